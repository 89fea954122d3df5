use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use notevox_app::config::AppConfig;
use notevox_app::runtime::{run, RuntimeOptions};

/// Live transcription supervisor for the NoteVox note-taking app.
#[derive(Debug, Parser)]
#[command(name = "notevox", version)]
struct Cli {
    /// Note id to record into
    #[arg(long, default_value = "quick-note")]
    note: String,

    /// Directory for transcripts, worker log dumps, and fallback records
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Host the capture/recognition pipeline in this process instead of a
    /// worker process
    #[arg(long)]
    in_process: bool,

    /// Worker binary to spawn (worker mode)
    #[arg(long)]
    worker_cmd: Option<PathBuf>,

    /// Seconds to wait before stopping after the user navigates away
    #[arg(long)]
    grace_period_secs: Option<u64>,

    /// Minimum snippet confidence surfaced to the UI
    #[arg(long)]
    confidence_threshold: Option<f32>,

    /// Optional TOML config file
    #[arg(long, env = "NOTEVOX_CONFIG")]
    config: Option<PathBuf>,
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "notevox.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging().map_err(|e| anyhow::anyhow!("logging init failed: {e}"))?;
    tracing::info!("Starting NoteVox supervisor");

    let file_config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let grace_period_secs = cli
        .grace_period_secs
        .or(file_config.grace_period_secs)
        .unwrap_or(30);
    let confidence_threshold = cli
        .confidence_threshold
        .or(file_config.confidence_threshold)
        .unwrap_or(0.5);
    let data_dir = cli
        .data_dir
        .or(file_config.data_dir)
        .unwrap_or_else(|| PathBuf::from("notes"));
    let worker_cmd = cli
        .worker_cmd
        .or(file_config.worker_cmd)
        .unwrap_or_else(|| PathBuf::from("notevox-worker"));

    let opts = RuntimeOptions {
        note: cli.note,
        data_dir,
        worker_cmd,
        in_process: cli.in_process,
        grace_period: Duration::from_secs(grace_period_secs),
        confidence_threshold,
    };

    run(opts).await
}
