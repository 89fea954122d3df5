//! Supervisor-side bridge to the worker process.
//!
//! Owns the worker's stdio channel: a background reader fans worker events
//! out to the caller, feeds request/reply pairs through a control channel,
//! and caches the last snippet per run so a timed-out stop can fall back to
//! interim text instead of blocking.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::fallback::{write_fallback, FallbackRecord};
use crate::protocol::{SupervisorMessage, WorkerConfig, WorkerEvent};
use notevox_foundation::AppError;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(60);
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Spawned,
    Ready,
    Initialized,
    Started,
    Stopped,
    Exited,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopResult {
    pub success: bool,
    pub timed_out: bool,
    /// On timeout, the last snippet received stands in for the final
    /// transcript. None on the normal path, where `sessionTranscript`
    /// arrives as an event.
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub is_recording: bool,
    pub is_processing: bool,
    pub note_id: Option<String>,
}

pub struct WorkerBridge {
    state: BridgeState,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    control_rx: mpsc::Receiver<WorkerEvent>,
    reader_task: JoinHandle<()>,
    last_snippet: Arc<Mutex<Option<String>>>,
    child: Option<Child>,
    fallback_dir: PathBuf,
    stop_timeout: Duration,
}

impl WorkerBridge {
    /// Spawn the worker binary with piped stdio.
    pub fn spawn(
        mut command: Command,
        event_tx: mpsc::Sender<WorkerEvent>,
        fallback_dir: PathBuf,
    ) -> Result<Self, AppError> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command
            .spawn()
            .map_err(|e| AppError::Fatal(format!("failed to spawn worker: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Fatal("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Fatal("worker stdout unavailable".into()))?;

        let mut bridge = Self::from_io(stdin, stdout, event_tx, fallback_dir);
        bridge.child = Some(child);
        info!("Worker process spawned");
        Ok(bridge)
    }

    /// Build the bridge over arbitrary streams; tests connect it to an
    /// in-process peer through a duplex pipe.
    pub fn from_io(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl AsyncRead + Send + Unpin + 'static,
        event_tx: mpsc::Sender<WorkerEvent>,
        fallback_dir: PathBuf,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(32);
        let last_snippet = Arc::new(Mutex::new(None));
        let reader_task = tokio::spawn(read_loop(
            reader,
            event_tx,
            control_tx,
            Arc::clone(&last_snippet),
        ));
        Self {
            state: BridgeState::Spawned,
            writer: Box::new(writer),
            control_rx,
            reader_task,
            last_snippet,
            child: None,
            fallback_dir,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Wait for the worker's `ready` announcement; returns its pid.
    pub async fn wait_ready(&mut self) -> Result<u32, AppError> {
        let event = self
            .await_control(REPLY_TIMEOUT, |e| matches!(e, WorkerEvent::Ready { .. }))
            .await?;
        let WorkerEvent::Ready { pid } = event else { unreachable!() };
        self.state = BridgeState::Ready;
        Ok(pid)
    }

    pub async fn initialize(&mut self, config: WorkerConfig) -> Result<bool, AppError> {
        self.send(&SupervisorMessage::Initialize { config }).await?;
        let event = self
            .await_control(REPLY_TIMEOUT, |e| matches!(e, WorkerEvent::Initialized { .. }))
            .await?;
        let WorkerEvent::Initialized { success } = event else { unreachable!() };
        if success {
            self.state = BridgeState::Initialized;
        }
        Ok(success)
    }

    pub async fn start(&mut self, note_id: &str) -> Result<bool, AppError> {
        self.send(&SupervisorMessage::Start { note_id: note_id.to_string() })
            .await?;
        let event = self
            .await_control(REPLY_TIMEOUT, |e| matches!(e, WorkerEvent::Started { .. }))
            .await?;
        let WorkerEvent::Started { success, .. } = event else { unreachable!() };
        if success {
            self.state = BridgeState::Started;
        }
        Ok(success)
    }

    /// Stop the remote session, racing the worker's completion signal
    /// against the stop timeout. A timeout is not a failure: the caller
    /// gets `timed_out = true` and the last snippet as the effective
    /// transcript.
    pub async fn stop(&mut self) -> Result<StopResult, AppError> {
        self.send(&SupervisorMessage::Stop).await?;
        match self
            .await_control(self.stop_timeout, |e| matches!(e, WorkerEvent::Stopped { .. }))
            .await
        {
            Ok(WorkerEvent::Stopped { success, timed_out }) => {
                self.state = BridgeState::Stopped;
                Ok(StopResult {
                    success,
                    timed_out: timed_out.unwrap_or(false),
                    transcript: None,
                })
            }
            Ok(_) => unreachable!(),
            Err(AppError::ProcessingTimeout) => {
                warn!(
                    "Worker stop timed out after {:?}; falling back to interim text",
                    self.stop_timeout
                );
                self.state = BridgeState::Stopped;
                Ok(StopResult {
                    success: true,
                    timed_out: true,
                    transcript: self.last_snippet.lock().clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_status(&mut self) -> Result<StatusReport, AppError> {
        self.send(&SupervisorMessage::GetStatus).await?;
        let event = self
            .await_control(REPLY_TIMEOUT, |e| matches!(e, WorkerEvent::Status { .. }))
            .await?;
        let WorkerEvent::Status { is_recording, is_processing, note_id } = event else {
            unreachable!()
        };
        Ok(StatusReport { is_recording, is_processing, note_id })
    }

    /// Close the channel and reap the process; the worker dumps its log on
    /// the way out.
    pub async fn shutdown(mut self) -> Result<(), AppError> {
        let _ = self.writer.shutdown().await;
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => debug!("Worker exited: {status}"),
                Ok(Err(e)) => warn!("Worker wait failed: {e}"),
                Err(_) => {
                    warn!("Worker did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }
        self.reader_task.abort();
        self.state = BridgeState::Exited;
        Ok(())
    }

    async fn await_control<F>(&mut self, timeout: Duration, pred: F) -> Result<WorkerEvent, AppError>
    where
        F: Fn(&WorkerEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.control_rx.recv()).await {
                Ok(Some(event)) if pred(&event) => return Ok(event),
                Ok(Some(event)) => {
                    debug!("Skipping stale control event: {}", event.kind());
                }
                Ok(None) => {
                    return Err(AppError::ChannelBroken("worker channel closed".into()))
                }
                Err(_) => return Err(AppError::ProcessingTimeout),
            }
        }
    }

    async fn send(&mut self, message: &SupervisorMessage) -> Result<(), AppError> {
        let line = message
            .to_json()
            .map_err(|e| AppError::Fatal(format!("message serialization failed: {e}")))?;

        let mut failure = None;
        if let Err(e) = self.writer.write_all(line.as_bytes()).await {
            failure = Some(e);
        } else if let Err(e) = self.writer.write_all(b"\n").await {
            failure = Some(e);
        } else if let Err(e) = self.writer.flush().await {
            failure = Some(e);
        }

        match failure {
            None => Ok(()),
            Some(e) => {
                error!("Worker channel send failed: {e}");
                let record = FallbackRecord::for_message(message);
                match write_fallback(&self.fallback_dir, &record) {
                    Ok(path) => info!("Undeliverable message persisted to {}", path.display()),
                    Err(we) => warn!("Fallback persistence failed: {we}"),
                }
                Err(AppError::ChannelBroken(e.to_string()))
            }
        }
    }
}

async fn read_loop(
    reader: impl AsyncRead + Unpin,
    event_tx: mpsc::Sender<WorkerEvent>,
    control_tx: mpsc::Sender<WorkerEvent>,
    last_snippet: Arc<Mutex<Option<String>>>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match WorkerEvent::from_json(line) {
                    Ok(event) => {
                        if let WorkerEvent::Snippet { text, .. } = &event {
                            *last_snippet.lock() = Some(text.clone());
                        }
                        let is_control = matches!(
                            event,
                            WorkerEvent::Ready { .. }
                                | WorkerEvent::Initialized { .. }
                                | WorkerEvent::Started { .. }
                                | WorkerEvent::Stopped { .. }
                                | WorkerEvent::Status { .. }
                        );
                        if is_control {
                            let _ = control_tx.send(event.clone()).await;
                        }
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Undecodable worker line: {e}"),
                }
            }
            Ok(None) => {
                debug!("Worker stdout closed");
                break;
            }
            Err(e) => {
                warn!("Worker read error: {e}");
                break;
            }
        }
    }
}
