//! Worker-side host loop.
//!
//! Serves the supervisor protocol over stdio against an in-process session
//! actor: announces `ready`, answers commands, streams snippet/transcript
//! events, and drives device reconnection with backoff. Every log line is
//! mirrored into the ring buffer, which is dumped to disk on any exit; a
//! message that cannot be sent over a broken channel is persisted to a
//! fallback file exactly once.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::backoff::ReconnectPolicy;
use crate::fallback::{write_fallback, FallbackRecord};
use crate::protocol::{SupervisorMessage, WorkerConfig, WorkerEvent, PROTOCOL_VERSION};
use crate::ring_log::{LogLevel, RingLog};
use notevox_audio::CaptureRegistry;
use notevox_foundation::{AppError, SessionStatus};
use notevox_session::{
    spawn_session, CapabilityFlags, CpalBackendFactory, GrantedPermissions, SessionConfig,
    SessionDeps, SessionEvent, SessionHandle,
};
use notevox_stt::{NoopEngine, RecognitionConfig, RecognitionStream};

#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Where note files, log dumps, and fallback records land.
    pub data_dir: PathBuf,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("notes") }
    }
}

/// Entry point for the worker binary: serve the protocol over stdio with
/// the real capture/engine stack.
pub async fn run(opts: HostOptions) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run_with_io(stdin, stdout, opts, default_session).await
}

fn default_session(config: &WorkerConfig) -> (SessionConfig, SessionDeps) {
    let session_config = SessionConfig {
        grace_period: Duration::from_secs(config.grace_period_secs),
        recognition: RecognitionConfig {
            confidence_threshold: config.confidence_threshold,
        },
        data_dir: config.data_dir.clone(),
        ..Default::default()
    };
    let deps = SessionDeps::new(
        Box::new(GrantedPermissions),
        Box::new(CpalBackendFactory::new(CaptureRegistry::new())),
        Arc::new(|_source| Ok(Box::new(NoopEngine) as Box<dyn RecognitionStream>)),
        CapabilityFlags::probe(),
    );
    (session_config, deps)
}

/// Host loop over arbitrary streams; tests connect through a duplex pipe
/// and inject scripted session dependencies.
pub async fn run_with_io<R, W, F>(
    reader: R,
    writer: W,
    opts: HostOptions,
    mut build_session: F,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&WorkerConfig) -> (SessionConfig, SessionDeps),
{
    let ring = Arc::new(Mutex::new(RingLog::default()));
    let mut out = EventWriter {
        writer,
        fallback_dir: opts.data_dir.clone(),
        ring: Arc::clone(&ring),
    };
    let policy = ReconnectPolicy::default();

    let (session_event_tx, mut session_events) = mpsc::channel::<SessionEvent>(256);
    let mut session: Option<SessionHandle> = None;
    let mut last_note: Option<String> = None;

    host_log(&ring, LogLevel::Info, "worker host starting");
    if out
        .send(&WorkerEvent::Ready { pid: std::process::id() })
        .await
        .is_err()
    {
        let _ = ring.lock().dump(&opts.data_dir, "channel-broken");
        anyhow::bail!("channel broken before ready");
    }

    let mut lines = BufReader::new(reader).lines();
    let mut exit_reason = "shutdown";

    'main: loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        host_log(&ring, LogLevel::Info, "supervisor channel closed");
                        break 'main;
                    }
                    Err(e) => {
                        host_log(&ring, LogLevel::Warn, format!("channel read error: {e}"));
                        break 'main;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let message = match SupervisorMessage::from_json(line) {
                    Ok(message) => message,
                    Err(e) => {
                        host_log(&ring, LogLevel::Warn, format!("undecodable message: {e}"));
                        if out
                            .send(&WorkerEvent::Error {
                                message: format!("invalid message: {e}"),
                                stack: None,
                            })
                            .await
                            .is_err()
                        {
                            exit_reason = "channel-broken";
                            break 'main;
                        }
                        continue;
                    }
                };

                host_log(&ring, LogLevel::Info, format!("received {}", message.kind()));
                let sent = match message {
                    SupervisorMessage::Initialize { config } => {
                        let mut success = config.protocol_version == PROTOCOL_VERSION;
                        if !success {
                            host_log(
                                &ring,
                                LogLevel::Warn,
                                format!(
                                    "protocol version mismatch: supervisor {}, worker {}",
                                    config.protocol_version, PROTOCOL_VERSION
                                ),
                            );
                        }
                        if success {
                            if session.is_none() {
                                let (session_config, deps) = build_session(&config);
                                session =
                                    Some(spawn_session(session_config, deps, session_event_tx.clone()));
                            }
                            success = match &session {
                                Some(handle) => handle.initialize().await.is_ok(),
                                None => false,
                            };
                        }
                        out.send(&WorkerEvent::Initialized { success }).await
                    }
                    SupervisorMessage::Start { note_id } => {
                        let success = match &session {
                            Some(handle) => handle.start(&note_id).await.is_ok(),
                            None => false,
                        };
                        if success {
                            last_note = Some(note_id.clone());
                        }
                        out.send(&WorkerEvent::Started { note_id, success }).await
                    }
                    SupervisorMessage::Stop => {
                        let success = match &session {
                            Some(handle) => handle.stop().await.is_ok(),
                            None => false,
                        };
                        out.send(&WorkerEvent::Stopped { success, timed_out: None }).await
                    }
                    SupervisorMessage::GetStatus => {
                        let status = match &session {
                            Some(handle) => handle.status().await.unwrap_or_default(),
                            None => SessionStatus::default(),
                        };
                        out.send(&WorkerEvent::Status {
                            is_recording: status.is_recording,
                            is_processing: status.is_processing,
                            note_id: status.note_id,
                        })
                        .await
                    }
                };
                if sent.is_err() {
                    exit_reason = "channel-broken";
                    break 'main;
                }
            }
            Some(event) = session_events.recv() => {
                let forwarded = forward_session_event(
                    event,
                    &mut out,
                    session.as_ref(),
                    last_note.as_deref(),
                    policy,
                    &ring,
                )
                .await;
                if forwarded.is_err() {
                    exit_reason = "channel-broken";
                    break 'main;
                }
            }
        }
    }

    if let Some(handle) = &session {
        let _ = handle.stop().await;
        handle.shutdown().await;
    }

    match ring.lock().dump(&opts.data_dir, exit_reason) {
        Ok(path) => tracing::info!("Worker log dumped to {}", path.display()),
        Err(e) => tracing::warn!("Worker log dump failed: {e}"),
    }
    Ok(())
}

async fn forward_session_event<W: AsyncWrite + Unpin>(
    event: SessionEvent,
    out: &mut EventWriter<W>,
    session: Option<&SessionHandle>,
    last_note: Option<&str>,
    policy: ReconnectPolicy,
    ring: &Arc<Mutex<RingLog>>,
) -> Result<(), AppError> {
    match event {
        SessionEvent::Snippet { text, confidence, session_id, .. } => {
            out.send(&WorkerEvent::Snippet { text, confidence, session_id }).await
        }
        SessionEvent::Transcript { text, session_id, .. } => {
            out.send(&WorkerEvent::SessionTranscript { text, session_id }).await
        }
        SessionEvent::StateChanged(state) => {
            host_log(ring, LogLevel::Debug, format!("session state: {state:?}"));
            Ok(())
        }
        SessionEvent::DeviceLost { source, reason } => {
            host_log(
                ring,
                LogLevel::Warn,
                format!("{source} disconnected: {reason}"),
            );
            out.send(&WorkerEvent::DeviceDisconnected { reason }).await?;
            if let (Some(handle), Some(note_id)) = (session, last_note) {
                run_reconnect(out, handle, note_id, policy, ring).await?;
            }
            Ok(())
        }
    }
}

/// Retry the lost device with exponential backoff, reporting each step.
async fn run_reconnect<W: AsyncWrite + Unpin>(
    out: &mut EventWriter<W>,
    session: &SessionHandle,
    note_id: &str,
    policy: ReconnectPolicy,
    ring: &Arc<Mutex<RingLog>>,
) -> Result<(), AppError> {
    for attempt in 1..=policy.max_attempts {
        out.send(&WorkerEvent::ReconnectionAttempt {
            attempt,
            max_attempts: policy.max_attempts,
        })
        .await?;
        tokio::time::sleep(policy.delay_for(attempt)).await;

        match session.start(note_id).await {
            Ok(()) => {
                host_log(
                    ring,
                    LogLevel::Info,
                    format!("reconnected after {attempt} attempt(s)"),
                );
                return out
                    .send(&WorkerEvent::ReconnectionSuccess { attempts_required: attempt })
                    .await;
            }
            Err(e) => host_log(
                ring,
                LogLevel::Warn,
                format!("reconnect attempt {attempt} failed: {e}"),
            ),
        }
    }
    out.send(&WorkerEvent::ReconnectionFailed {
        total_attempts: policy.max_attempts,
    })
    .await
}

struct EventWriter<W> {
    writer: W,
    fallback_dir: PathBuf,
    ring: Arc<Mutex<RingLog>>,
}

impl<W: AsyncWrite + Unpin> EventWriter<W> {
    async fn send(&mut self, event: &WorkerEvent) -> Result<(), AppError> {
        let line = event
            .to_json()
            .map_err(|e| AppError::Fatal(format!("event serialization failed: {e}")))?;

        let mut failure = None;
        if let Err(e) = self.writer.write_all(line.as_bytes()).await {
            failure = Some(e);
        } else if let Err(e) = self.writer.write_all(b"\n").await {
            failure = Some(e);
        } else if let Err(e) = self.writer.flush().await {
            failure = Some(e);
        }

        match failure {
            None => {
                self.ring
                    .lock()
                    .push(LogLevel::Debug, "host", format!("sent {}", event.kind()));
                Ok(())
            }
            Some(e) => {
                self.ring.lock().push(
                    LogLevel::Error,
                    "host",
                    format!("send failed for {}: {e}", event.kind()),
                );
                let record = FallbackRecord::for_event(event);
                match write_fallback(&self.fallback_dir, &record) {
                    Ok(path) => tracing::info!(
                        "Undeliverable {} persisted to {}",
                        event.kind(),
                        path.display()
                    ),
                    Err(we) => tracing::warn!("Fallback persistence failed: {we}"),
                }
                Err(AppError::ChannelBroken(e.to_string()))
            }
        }
    }
}

fn host_log(ring: &Arc<Mutex<RingLog>>, level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    match level {
        LogLevel::Debug => tracing::debug!("{message}"),
        LogLevel::Info => tracing::info!("{message}"),
        LogLevel::Warn => tracing::warn!("{message}"),
        LogLevel::Error => tracing::error!("{message}"),
    }
    ring.lock().push(level, "host", message);
}
