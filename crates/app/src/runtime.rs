//! Supervisor runtime wiring.
//!
//! Two deployments: the default spawns the recognition workload into a
//! separate worker process behind `WorkerBridge`; `--in-process` hosts the
//! session actor directly for environments where a second process is
//! unwanted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};

use notevox_audio::CaptureRegistry;
use notevox_foundation::SourceKind;
use notevox_session::{
    spawn_session, CapabilityFlags, CpalBackendFactory, GrantedPermissions, SessionConfig,
    SessionDeps, SessionEvent,
};
use notevox_stt::{NoopEngine, RecognitionConfig, RecognitionStream};
use notevox_worker::{WorkerBridge, WorkerConfig, WorkerEvent, PROTOCOL_VERSION};

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub note: String,
    pub data_dir: PathBuf,
    pub worker_cmd: PathBuf,
    pub in_process: bool,
    pub grace_period: Duration,
    pub confidence_threshold: f32,
}

pub async fn run(opts: RuntimeOptions) -> anyhow::Result<()> {
    if opts.in_process {
        run_in_process(opts).await
    } else {
        run_with_worker(opts).await
    }
}

async fn run_in_process(opts: RuntimeOptions) -> anyhow::Result<()> {
    info!("Hosting recognition in-process");

    let config = SessionConfig {
        grace_period: opts.grace_period,
        recognition: RecognitionConfig {
            confidence_threshold: opts.confidence_threshold,
        },
        data_dir: opts.data_dir.clone(),
        ..Default::default()
    };
    let deps = SessionDeps::new(
        Box::new(GrantedPermissions),
        Box::new(CpalBackendFactory::new(CaptureRegistry::new())),
        Arc::new(engine_for),
        CapabilityFlags::probe(),
    );

    let (event_tx, mut events) = mpsc::channel(256);
    let handle = spawn_session(config, deps, event_tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged(state) => info!("Session state: {state:?}"),
                SessionEvent::Snippet { note_id, text, .. } => {
                    info!("[{note_id}] {text}");
                }
                SessionEvent::Transcript { note_id, text, .. } => {
                    info!("[{note_id}] final: {text}");
                }
                SessionEvent::DeviceLost { source, reason } => {
                    warn!("{source} lost: {reason}");
                }
            }
        }
    });

    handle.initialize().await.context("initialization failed")?;
    handle.start(&opts.note).await.context("start failed")?;
    info!("Recording note '{}'; press Ctrl+C to stop", opts.note);

    tokio::signal::ctrl_c().await?;
    info!("Stopping...");
    let outcome = handle.stop().await?;
    if let Some(transcript) = outcome.transcript {
        info!("Final transcript:\n{transcript}");
    }
    handle.shutdown().await;
    printer.abort();
    Ok(())
}

fn engine_for(
    _source: SourceKind,
) -> Result<Box<dyn RecognitionStream>, notevox_stt::EngineError> {
    // Recognition backends plug in here; the noop engine keeps the pipeline
    // runnable without one installed.
    Ok(Box::new(NoopEngine))
}

async fn run_with_worker(opts: RuntimeOptions) -> anyhow::Result<()> {
    info!("Spawning recognition worker: {}", opts.worker_cmd.display());

    let mut command = tokio::process::Command::new(&opts.worker_cmd);
    command.arg("--data-dir").arg(&opts.data_dir);

    let (event_tx, mut events) = mpsc::channel(256);
    let mut bridge = WorkerBridge::spawn(command, event_tx, opts.data_dir.clone())
        .context("failed to spawn worker")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Snippet { text, .. } => info!("snippet: {text}"),
                WorkerEvent::SessionTranscript { text, .. } => info!("final: {text}"),
                WorkerEvent::DeviceDisconnected { reason } => {
                    warn!("Device disconnected: {reason}");
                }
                WorkerEvent::ReconnectionAttempt { attempt, max_attempts } => {
                    info!("Reconnecting ({attempt}/{max_attempts})...");
                }
                WorkerEvent::ReconnectionSuccess { attempts_required } => {
                    info!("Reconnected after {attempts_required} attempt(s)");
                }
                WorkerEvent::ReconnectionFailed { total_attempts } => {
                    warn!("Reconnection failed after {total_attempts} attempts");
                }
                WorkerEvent::Error { message, .. } => warn!("Worker error: {message}"),
                _ => {}
            }
        }
    });

    let pid = bridge.wait_ready().await.context("worker never became ready")?;
    info!("Worker ready (pid {pid})");

    let config = WorkerConfig {
        protocol_version: PROTOCOL_VERSION,
        data_dir: opts.data_dir.clone(),
        grace_period_secs: opts.grace_period.as_secs(),
        confidence_threshold: opts.confidence_threshold,
    };
    if !bridge.initialize(config).await? {
        anyhow::bail!("worker refused initialization");
    }
    if !bridge.start(&opts.note).await? {
        anyhow::bail!("worker could not start recording");
    }
    info!("Recording note '{}'; press Ctrl+C to stop", opts.note);

    tokio::signal::ctrl_c().await?;
    info!("Stopping...");
    let result = bridge.stop().await?;
    if result.timed_out {
        match result.transcript {
            Some(text) => info!("Stop timed out; interim transcript:\n{text}"),
            None => warn!("Stop timed out with no interim text received"),
        }
    }

    bridge.shutdown().await?;
    printer.abort();
    Ok(())
}
