use clap::Parser;
use std::path::PathBuf;

use notevox_worker::{run, HostOptions};

/// NoteVox recognition worker. Speaks the supervisor protocol on stdio;
/// all logging goes to stderr so stdout stays a clean message channel.
#[derive(Debug, Parser)]
#[command(name = "notevox-worker", version)]
struct Cli {
    /// Directory for transcripts, log dumps, and fallback records
    #[arg(long, default_value = "notes")]
    data_dir: PathBuf,
}

fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_level)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();
    tracing::info!("NoteVox worker starting (pid {})", std::process::id());

    run(HostOptions { data_dir: cli.data_dir }).await
}
