//! Session actor and handle
//!
//! One task owns all mutable session state. Commands, recognition runner
//! events, the grace-period deadline, and the capture health tick are
//! merged through a single select loop, which keeps grace cancellation
//! synchronous with every other session mutation.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use notevox_audio::{
    CaptureBackend, CaptureRegistry, ConverterBank, CpalBackend, EngineFormat,
};
use notevox_foundation::{
    real_clock, AppError, SessionState, SessionStatus, SharedClock, SourceKind, StateTracker,
};
use notevox_stt::runner::{RecognitionRunner, RunnerEvent, RunnerInput};
use notevox_stt::{EngineFactory, RecognitionConfig, TranscriptAggregator};

use crate::grace::{should_defer, GraceScheduler, DEFAULT_GRACE_PERIOD};
use crate::permissions::PermissionBroker;
use crate::probe::{select_pipeline, CapabilityFlags, PipelineMode};
use crate::store::TranscriptStore;

/// Builds capture backends per source when a pipeline starts.
pub trait BackendFactory: Send + Sync {
    fn create(&mut self, source: SourceKind) -> Box<dyn CaptureBackend>;
}

/// Production factory: CPAL devices guarded by a capture registry.
pub struct CpalBackendFactory {
    registry: CaptureRegistry,
}

impl CpalBackendFactory {
    pub fn new(registry: CaptureRegistry) -> Self {
        Self { registry }
    }
}

impl BackendFactory for CpalBackendFactory {
    fn create(&mut self, source: SourceKind) -> Box<dyn CaptureBackend> {
        Box::new(CpalBackend::new(source, self.registry.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub grace_period: Duration,
    /// How long `stop()` waits for a late final before falling back to
    /// interim text.
    pub finalize_grace: Duration,
    /// How long after a stop a late transcript is still attributed to the
    /// most-recently-active note.
    pub attribution_window: Duration,
    pub recognition: RecognitionConfig,
    pub engine_format: EngineFormat,
    pub data_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            finalize_grace: Duration::from_millis(500),
            attribution_window: Duration::from_secs(5),
            recognition: RecognitionConfig::default(),
            engine_format: EngineFormat::default(),
            data_dir: PathBuf::from("notes"),
        }
    }
}

/// Injected seams: permission prompting, capture construction, engine
/// construction, and the capability flags resolved by the caller.
pub struct SessionDeps {
    pub permissions: Box<dyn PermissionBroker>,
    pub backends: Box<dyn BackendFactory>,
    pub engines: EngineFactory,
    pub capabilities: CapabilityFlags,
    pub clock: SharedClock,
}

impl SessionDeps {
    pub fn new(
        permissions: Box<dyn PermissionBroker>,
        backends: Box<dyn BackendFactory>,
        engines: EngineFactory,
        capabilities: CapabilityFlags,
    ) -> Self {
        Self {
            permissions,
            backends,
            engines,
            capabilities,
            clock: real_clock(),
        }
    }
}

/// Events delivered to the UI layer over its subscription channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Snippet { note_id: String, text: String, confidence: f32, session_id: u64 },
    Transcript { note_id: String, text: String, session_id: u64 },
    DeviceLost { source: SourceKind, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopOutcome {
    /// False when stop was a no-op (no session was recording).
    pub stopped: bool,
    pub transcript: Option<String>,
}

pub enum SessionCommand {
    Initialize { reply: oneshot::Sender<Result<(), AppError>> },
    Start { note_id: String, reply: oneshot::Sender<Result<(), AppError>> },
    Stop { reply: oneshot::Sender<StopOutcome> },
    Status { reply: oneshot::Sender<SessionStatus> },
    FocusLost { note_id: Option<String>, ack: oneshot::Sender<()> },
    FocusGained { note_id: String, ack: oneshot::Sender<()> },
    Shutdown,
}

/// Clonable handle to a session actor. Dropping every handle shuts the
/// actor down once its channel drains.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn initialize(&self) -> Result<(), AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Initialize { reply }).await?;
        rx.await.map_err(|_| gone())?
    }

    pub async fn start(&self, note_id: &str) -> Result<(), AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Start { note_id: note_id.to_string(), reply })
            .await?;
        rx.await.map_err(|_| gone())?
    }

    pub async fn stop(&self) -> Result<StopOutcome, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Stop { reply }).await?;
        rx.await.map_err(|_| gone())
    }

    pub async fn status(&self) -> Result<SessionStatus, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Status { reply }).await?;
        rx.await.map_err(|_| gone())
    }

    /// Report that focus moved to `note_id` (None: window hidden). Resolves
    /// once the trigger is registered.
    pub async fn focus_lost(&self, note_id: Option<&str>) -> Result<(), AppError> {
        let (ack, rx) = oneshot::channel();
        self.send(SessionCommand::FocusLost {
            note_id: note_id.map(str::to_string),
            ack,
        })
        .await?;
        rx.await.map_err(|_| gone())
    }

    pub async fn focus_gained(&self, note_id: &str) -> Result<(), AppError> {
        let (ack, rx) = oneshot::channel();
        self.send(SessionCommand::FocusGained { note_id: note_id.to_string(), ack })
            .await?;
        rx.await.map_err(|_| gone())
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown).await;
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), AppError> {
        self.cmd_tx.send(cmd).await.map_err(|_| gone())
    }
}

fn gone() -> AppError {
    AppError::Fatal("session task is gone".into())
}

/// Spawn a session actor; returns its handle. Session events stream to
/// `event_tx` on the receiver's own context.
pub fn spawn_session(
    config: SessionConfig,
    deps: SessionDeps,
    event_tx: mpsc::Sender<SessionEvent>,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let actor = SessionActor::new(config, deps, cmd_rx, event_tx);
    tokio::spawn(actor.run());
    SessionHandle { cmd_tx }
}

struct ActivePipeline {
    session_id: u64,
    note_id: String,
    mode: PipelineMode,
    captures: Vec<Box<dyn CaptureBackend>>,
    pumps: Vec<std::thread::JoinHandle<()>>,
    runner_inputs: HashMap<SourceKind, mpsc::Sender<RunnerInput>>,
    runner_tasks: Vec<JoinHandle<()>>,
    aggregator: TranscriptAggregator,
}

struct SessionActor {
    config: SessionConfig,
    deps: SessionDeps,
    tracker: StateTracker,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    runner_tx: mpsc::Sender<RunnerEvent>,
    runner_rx: mpsc::Receiver<RunnerEvent>,
    pipeline: Option<ActivePipeline>,
    /// Capability selection; Some once initialize succeeded.
    mode: Option<PipelineMode>,
    grace: GraceScheduler,
    store: TranscriptStore,
    session_counter: u64,
    /// Most recently stopped note and when, for late-transcript attribution.
    last_note: Option<(String, Instant)>,
}

impl SessionActor {
    fn new(
        config: SessionConfig,
        deps: SessionDeps,
        cmd_rx: mpsc::Receiver<SessionCommand>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (runner_tx, runner_rx) = mpsc::channel(256);
        let grace = GraceScheduler::new(config.grace_period);
        let store = TranscriptStore::new(config.data_dir.clone());
        Self {
            config,
            deps,
            tracker: StateTracker::new(),
            cmd_rx,
            event_tx,
            runner_tx,
            runner_rx,
            pipeline: None,
            mode: None,
            grace,
            store,
            session_counter: 0,
            last_note: None,
        }
    }

    async fn run(mut self) {
        info!("Session actor started");
        let mut health = tokio::time::interval(Duration::from_millis(500));
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(event) = self.runner_rx.recv() => {
                    self.handle_runner_event(event).await;
                }
                _ = self.grace.expired(), if self.grace.is_armed() => {
                    self.grace.cancel();
                    info!("Grace period elapsed, stopping session");
                    self.do_stop().await;
                }
                _ = health.tick(), if self.pipeline.is_some() => {
                    self.check_capture_health().await;
                }
            }
        }

        if self.tracker.current().is_recording() {
            self.do_stop().await;
        }
        info!("Session actor stopped");
    }

    /// Returns false when the actor should exit.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Initialize { reply } => {
                let result = self.do_initialize(true).await;
                let _ = reply.send(result);
            }
            SessionCommand::Start { note_id, reply } => {
                let result = self.do_start(&note_id).await;
                let _ = reply.send(result);
            }
            SessionCommand::Stop { reply } => {
                let outcome = self.do_stop().await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.tracker.status());
            }
            SessionCommand::FocusLost { note_id, ack } => {
                let state = self.tracker.current();
                if should_defer(state.note_id(), note_id.as_deref()) {
                    self.grace.arm();
                }
                let _ = ack.send(());
            }
            SessionCommand::FocusGained { note_id, ack } => {
                if self.tracker.current().note_id() == Some(note_id.as_str()) {
                    self.grace.cancel();
                }
                let _ = ack.send(());
            }
            SessionCommand::Shutdown => return false,
        }
        true
    }

    /// Request permissions and select the pipeline shape. Idempotent: a
    /// no-op outside `Idle`/`Error`. With `standalone` the state returns to
    /// `Idle` afterwards; `start` keeps it `Initialising` and continues.
    async fn do_initialize(&mut self, standalone: bool) -> Result<(), AppError> {
        match self.tracker.current() {
            SessionState::Idle | SessionState::Error { .. } => {}
            _ => return Ok(()),
        }

        self.transition(SessionState::Initialising).await?;

        if let Err(e) = self.deps.permissions.request().await {
            warn!("Permission request failed: {e}");
            self.set_error(e.to_string()).await;
            return Err(e);
        }

        let mode = select_pipeline(&self.deps.capabilities);
        info!("Pipeline capability selection: {:?}", mode);
        self.mode = Some(mode);

        if standalone {
            self.transition(SessionState::Idle).await?;
        }
        Ok(())
    }

    async fn do_start(&mut self, note_id: &str) -> Result<(), AppError> {
        // Starting always clears a pending deferred stop first.
        self.grace.cancel();

        match self.tracker.current() {
            SessionState::Recording { note_id: current } if current == note_id => {
                debug!("start({note_id}): already recording this note");
                return Ok(());
            }
            SessionState::Recording { .. } => {
                info!("start({note_id}): stopping current session first");
                self.do_stop().await;
            }
            _ => {}
        }

        match self.tracker.current() {
            SessionState::Idle | SessionState::Error { .. } => {
                self.do_initialize(false).await?;
            }
            SessionState::Initialising => {}
            state => {
                return Err(AppError::Fatal(format!(
                    "start() from unexpected state {state:?}"
                )))
            }
        }

        match self.build_pipeline(note_id) {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.transition(SessionState::Recording { note_id: note_id.to_string() })
                    .await?;
                Ok(())
            }
            Err(e) => {
                error!("Pipeline construction failed: {e}");
                self.set_error(e.to_string()).await;
                Err(AppError::NotInitialised)
            }
        }
    }

    fn build_pipeline(&mut self, note_id: &str) -> Result<ActivePipeline, AppError> {
        let mode = self.mode.ok_or(AppError::NotInitialised)?;
        let sources = mode.sources();

        self.session_counter += 1;
        let session_id = self.session_counter;

        let mut pipeline = ActivePipeline {
            session_id,
            note_id: note_id.to_string(),
            mode,
            captures: Vec::new(),
            pumps: Vec::new(),
            runner_inputs: HashMap::new(),
            runner_tasks: Vec::new(),
            aggregator: TranscriptAggregator::new(sources),
        };

        for &source in sources {
            let (frame_tx, frame_rx) = crossbeam_channel::bounded(256);
            let mut backend = self.deps.backends.create(source);
            if let Err(e) = backend.start(frame_tx) {
                // Release whatever already opened before reporting.
                for capture in &mut pipeline.captures {
                    capture.stop();
                }
                return Err(e.into());
            }

            let (input_tx, input_rx) = mpsc::channel(256);
            let runner = RecognitionRunner::new(
                session_id,
                source,
                self.deps.engines.clone(),
                self.config.recognition.clone(),
                input_rx,
                self.runner_tx.clone(),
            )
            .map_err(|e| AppError::Fatal(format!("engine construction failed: {e}")))?;

            let engine_format = self.config.engine_format;
            let pump_tx = input_tx.clone();
            let pump = std::thread::Builder::new()
                .name(format!("convert-{}", source.label().to_lowercase().replace(' ', "-")))
                .spawn(move || {
                    let mut bank = ConverterBank::new(engine_format);
                    while let Ok(frame) = frame_rx.recv() {
                        match bank.convert(&frame) {
                            Some(pcm) if !pcm.is_empty() => {
                                if pump_tx.blocking_send(RunnerInput::Frame(pcm)).is_err() {
                                    break;
                                }
                            }
                            // Empty output (resampler filling) or dropped
                            // malformed buffer: keep consuming.
                            _ => {}
                        }
                    }
                })
                .map_err(|e| AppError::Fatal(format!("failed to spawn converter: {e}")))?;

            pipeline.captures.push(backend);
            pipeline.pumps.push(pump);
            pipeline.runner_inputs.insert(source, input_tx);
            pipeline.runner_tasks.push(tokio::spawn(runner.run()));
        }

        info!(
            "Pipeline built for note {note_id}: session {session_id}, {:?} ({} source(s))",
            pipeline.mode,
            sources.len()
        );
        Ok(pipeline)
    }

    /// Stop the active session. A no-op (no state change, no events) unless
    /// a session is recording.
    async fn do_stop(&mut self) -> StopOutcome {
        if !self.tracker.current().is_recording() {
            debug!("stop(): no active recording");
            return StopOutcome { stopped: false, transcript: None };
        }

        let Some(mut pipeline) = self.pipeline.take() else {
            return StopOutcome { stopped: false, transcript: None };
        };
        let note_id = pipeline.note_id.clone();

        let _ = self.transition(SessionState::Processing).await;

        // Quiesce capture first; no frame is delivered past this point.
        for capture in &mut pipeline.captures {
            capture.stop();
        }
        for pump in pipeline.pumps.drain(..) {
            let _ = pump.join();
        }

        // The interim text is available immediately; never wait on the
        // engine for it.
        let interim = pipeline.aggregator.best_text();

        for (source, input_tx) in &pipeline.runner_inputs {
            if input_tx.send(RunnerInput::Finalize).await.is_err() {
                warn!("{source}: runner gone before finalize");
            }
        }
        pipeline.runner_inputs.clear();

        // Bounded wait for late finals; fall back to interim text after it.
        let mut pending: HashSet<SourceKind> =
            pipeline.mode.sources().iter().copied().collect();
        let deadline = tokio::time::Instant::now() + self.config.finalize_grace;
        while !pending.is_empty() {
            match tokio::time::timeout_at(deadline, self.runner_rx.recv()).await {
                Ok(Some(RunnerEvent::Transcript(t))) if t.session_id == pipeline.session_id => {
                    pending.remove(&t.source);
                    pipeline.aggregator.apply_final(t.source, &t.text);
                }
                Ok(Some(RunnerEvent::Snippet(s))) if s.session_id == pipeline.session_id => {
                    pipeline.aggregator.apply_snippet(s.source, &s.text);
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Finalize grace elapsed with {} source(s) outstanding; using interim text",
                        pending.len()
                    );
                    break;
                }
            }
        }

        // Runner tasks still draining are left to finish on their own;
        // anything they emit later goes through the attribution window.
        pipeline.runner_tasks.clear();

        let mut transcript = pipeline.aggregator.best_text();
        if transcript.is_empty() {
            transcript = interim;
        }

        self.last_note = Some((note_id.clone(), self.deps.clock.now()));
        let _ = self.transition(SessionState::Idle).await;

        if let Err(e) = self.store.append_transcript(&note_id, &transcript) {
            warn!("Failed to persist transcript for {note_id}: {e}");
        }
        self.emit(SessionEvent::Transcript {
            note_id,
            text: transcript.clone(),
            session_id: pipeline.session_id,
        })
        .await;

        StopOutcome { stopped: true, transcript: Some(transcript) }
    }

    async fn handle_runner_event(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::Snippet(snippet) => {
                let current = self
                    .pipeline
                    .as_mut()
                    .filter(|p| p.session_id == snippet.session_id);
                if let Some(pipeline) = current {
                    pipeline.aggregator.apply_snippet(snippet.source, &snippet.text);
                    let note_id = pipeline.note_id.clone();
                    if let Err(e) = self.store.append_snippet(&note_id, &snippet.text) {
                        warn!("Failed to persist snippet for {note_id}: {e}");
                    }
                    self.emit(SessionEvent::Snippet {
                        note_id,
                        text: snippet.text,
                        confidence: snippet.confidence,
                        session_id: snippet.session_id,
                    })
                    .await;
                } else {
                    debug!("Dropping snippet for inactive session {}", snippet.session_id);
                }
            }
            RunnerEvent::Transcript(transcript) => {
                let target = attribution_target(
                    self.last_note.as_ref(),
                    self.deps.clock.now(),
                    self.config.attribution_window,
                );
                match target {
                    Some(note_id) => {
                        info!(
                            "Late transcript attributed to most-recent note {note_id} ({} words)",
                            transcript.word_count
                        );
                        if let Err(e) = self.store.append_transcript(&note_id, &transcript.text) {
                            warn!("Failed to persist late transcript: {e}");
                        }
                        self.emit(SessionEvent::Transcript {
                            note_id,
                            text: transcript.text,
                            session_id: transcript.session_id,
                        })
                        .await;
                    }
                    None => {
                        debug!(
                            "Dropping late transcript for session {}: outside attribution window",
                            transcript.session_id
                        );
                    }
                }
            }
            RunnerEvent::Failed { source, message } => {
                error!("{source} recognition failed: {message}");
                self.teardown_with_error(format!("{source} recognition failed: {message}"))
                    .await;
            }
        }
    }

    async fn check_capture_health(&mut self) {
        let Some(pipeline) = &mut self.pipeline else {
            return;
        };
        let mut lost: Option<(SourceKind, String)> = None;
        for capture in &mut pipeline.captures {
            if let Some(reason) = capture.loss() {
                lost = Some((capture.source(), reason));
                break;
            }
        }
        if let Some((source, reason)) = lost {
            warn!("{source} capture lost: {reason}");
            self.emit(SessionEvent::DeviceLost { source, reason: reason.clone() })
                .await;
            // Device state is outside this system's control: surface, no
            // automatic retry here.
            self.teardown_with_error(format!("{source} device lost: {reason}"))
                .await;
        }
    }

    async fn teardown_with_error(&mut self, message: String) {
        if let Some(mut pipeline) = self.pipeline.take() {
            for capture in &mut pipeline.captures {
                capture.stop();
            }
            for task in pipeline.runner_tasks.drain(..) {
                task.abort();
            }
        }
        self.set_error(message).await;
    }

    async fn set_error(&mut self, message: String) {
        let _ = self.transition(SessionState::Error { message }).await;
    }

    async fn transition(&mut self, state: SessionState) -> Result<(), AppError> {
        self.tracker.transition(state.clone())?;
        self.emit(SessionEvent::StateChanged(state)).await;
        Ok(())
    }

    async fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

/// Which note, if any, a late transcript should be attributed to.
fn attribution_target(
    last_note: Option<&(String, Instant)>,
    now: Instant,
    window: Duration,
) -> Option<String> {
    last_note.and_then(|(note_id, stopped_at)| {
        if now.duration_since(*stopped_at) <= window {
            Some(note_id.clone())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_transcripts_attach_within_window_only() {
        let stopped_at = Instant::now();
        let last = ("note-9".to_string(), stopped_at);
        let window = Duration::from_secs(5);

        assert_eq!(
            attribution_target(Some(&last), stopped_at + Duration::from_secs(3), window),
            Some("note-9".to_string())
        );
        assert_eq!(
            attribution_target(Some(&last), stopped_at + Duration::from_secs(6), window),
            None
        );
        assert_eq!(attribution_target(None, stopped_at, window), None);
    }
}
