//! Session coordinator integration tests
//!
//! Drives the session actor end-to-end over scripted capture backends and
//! scripted engines: lifecycle legality, multi-source aggregation, grace
//! period policy, and device-loss surfacing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use notevox_audio::{CaptureBackend, ScriptedBackend};
use notevox_foundation::{SessionState, SourceKind};
use notevox_session::{
    spawn_session, BackendFactory, CapabilityFlags, DeniedPermissions, GrantedPermissions,
    SessionConfig, SessionDeps, SessionEvent, SessionHandle,
};
use notevox_stt::{EngineFactory, RecognitionStream, ScriptedEngine};
use tokio::sync::mpsc;

struct ScriptedBackendFactory {
    backends: HashMap<SourceKind, Vec<ScriptedBackend>>,
}

impl ScriptedBackendFactory {
    fn new() -> Self {
        Self { backends: HashMap::new() }
    }

    fn push(&mut self, source: SourceKind, backend: ScriptedBackend) {
        self.backends.entry(source).or_default().push(backend);
    }
}

impl BackendFactory for ScriptedBackendFactory {
    fn create(&mut self, source: SourceKind) -> Box<dyn CaptureBackend> {
        let backend = self
            .backends
            .get_mut(&source)
            .and_then(|v| if v.is_empty() { None } else { Some(v.remove(0)) })
            .unwrap_or_else(|| ScriptedBackend::new(source));
        Box::new(backend)
    }
}

/// Engine factory that replays one script per source, then empty engines.
fn engines_for(scripts: Vec<(SourceKind, ScriptedEngine)>) -> EngineFactory {
    let scripts = Arc::new(std::sync::Mutex::new(scripts));
    Arc::new(move |source| {
        let mut guard = scripts.lock().unwrap();
        let engine = guard
            .iter()
            .position(|(s, _)| *s == source)
            .map(|i| guard.remove(i).1)
            .unwrap_or_default();
        Ok(Box::new(engine) as Box<dyn RecognitionStream>)
    })
}

fn dual_caps() -> CapabilityFlags {
    CapabilityFlags { microphone: true, system_audio: true }
}

fn mic_caps() -> CapabilityFlags {
    CapabilityFlags { microphone: true, system_audio: false }
}

struct Harness {
    handle: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
    _dir: tempfile::TempDir,
    dir_path: std::path::PathBuf,
}

fn spawn_harness(
    factory: ScriptedBackendFactory,
    engines: EngineFactory,
    caps: CapabilityFlags,
    grace_period: Duration,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_path_buf();
    let config = SessionConfig {
        grace_period,
        data_dir: dir_path.clone(),
        ..Default::default()
    };
    let deps = SessionDeps::new(
        Box::new(GrantedPermissions),
        Box::new(factory),
        engines,
        caps,
    );
    let (event_tx, events) = mpsc::channel(128);
    let handle = spawn_session(config, deps, event_tx);
    Harness { handle, events, _dir: dir, dir_path }
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn stop_while_idle_is_a_noop_with_no_events() {
    let mut h = spawn_harness(
        ScriptedBackendFactory::new(),
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    let outcome = h.handle.stop().await.unwrap();
    assert!(!outcome.stopped);
    assert_eq!(outcome.transcript, None);

    let status = h.handle.status().await.unwrap();
    assert!(!status.is_recording);
    assert!(h.events.try_recv().is_err(), "no event may fire for a no-op stop");
}

#[tokio::test]
async fn dual_source_session_merges_labeled_transcripts() {
    let mut factory = ScriptedBackendFactory::new();
    factory.push(
        SourceKind::Microphone,
        ScriptedBackend::new(SourceKind::Microphone).with_frames(vec![vec![1i16; 512]; 2]),
    );
    factory.push(
        SourceKind::SystemAudio,
        ScriptedBackend::new(SourceKind::SystemAudio).with_frames(vec![vec![1i16; 512]; 2]),
    );

    let engines = engines_for(vec![
        (
            SourceKind::Microphone,
            ScriptedEngine::new()
                .then_snippet("Hello", 0.9)
                .with_final("Hello", 0.9),
        ),
        (
            SourceKind::SystemAudio,
            ScriptedEngine::new()
                .then_snippet("World", 0.9)
                .with_final("World", 0.9),
        ),
    ]);

    let mut h = spawn_harness(factory, engines, dual_caps(), Duration::from_secs(30));

    h.handle.start("note-a").await.unwrap();
    let status = h.handle.status().await.unwrap();
    assert!(status.is_recording);
    assert_eq!(status.note_id.as_deref(), Some("note-a"));

    // Both sources surface a snippet before we stop.
    let mut snippets = 0;
    while snippets < 2 {
        if let SessionEvent::Snippet { note_id, .. } = next_event(&mut h.events).await {
            assert_eq!(note_id, "note-a");
            snippets += 1;
        }
    }

    let outcome = h.handle.stop().await.unwrap();
    assert!(outcome.stopped);
    let transcript = outcome.transcript.unwrap();
    assert_eq!(transcript, "Hello\n\nWorld");

    // Transcript file carries the merged text under a timestamp header.
    let path = h.dir_path.join("note-a.transcription");
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.contains("Hello"));
    assert!(contents.contains("World"));

    let snippet_file = h.dir_path.join("note-a.snippet");
    assert!(snippet_file.exists());
}

#[tokio::test]
async fn start_for_the_same_note_is_a_noop() {
    let mut factory = ScriptedBackendFactory::new();
    factory.push(SourceKind::Microphone, ScriptedBackend::new(SourceKind::Microphone));
    let h = spawn_harness(
        factory,
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    h.handle.start("note-a").await.unwrap();
    h.handle.start("note-a").await.unwrap();

    let status = h.handle.status().await.unwrap();
    assert!(status.is_recording);
    assert_eq!(status.note_id.as_deref(), Some("note-a"));
}

#[tokio::test]
async fn starting_another_note_stops_the_current_session_first() {
    let mut factory = ScriptedBackendFactory::new();
    factory.push(SourceKind::Microphone, ScriptedBackend::new(SourceKind::Microphone));
    factory.push(SourceKind::Microphone, ScriptedBackend::new(SourceKind::Microphone));

    let mut h = spawn_harness(
        factory,
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    h.handle.start("note-a").await.unwrap();
    h.handle.start("note-b").await.unwrap();

    let status = h.handle.status().await.unwrap();
    assert_eq!(status.note_id.as_deref(), Some("note-b"));

    // The first session was fully stopped: its final transcript event fired
    // for note-a before note-b began recording.
    let mut saw_a_transcript = false;
    let mut saw_b_recording = false;
    while let Ok(event) = h.events.try_recv() {
        match event {
            SessionEvent::Transcript { note_id, .. } if note_id == "note-a" => {
                assert!(!saw_b_recording);
                saw_a_transcript = true;
            }
            SessionEvent::StateChanged(SessionState::Recording { note_id })
                if note_id == "note-b" =>
            {
                saw_b_recording = true;
            }
            _ => {}
        }
    }
    assert!(saw_a_transcript);
    assert!(saw_b_recording);
}

#[tokio::test]
async fn permission_denial_leaves_the_session_in_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig { data_dir: dir.path().to_path_buf(), ..Default::default() };
    let deps = SessionDeps::new(
        Box::new(DeniedPermissions("microphone access".into())),
        Box::new(ScriptedBackendFactory::new()),
        engines_for(vec![]),
        mic_caps(),
    );
    let (event_tx, mut events) = mpsc::channel(64);
    let handle = spawn_session(config, deps, event_tx);

    let err = handle.initialize().await.unwrap_err();
    assert!(matches!(err, notevox_foundation::AppError::PermissionDenied(_)));

    settle().await;
    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged(SessionState::Error { message }) = event {
            assert!(message.contains("microphone access"));
            saw_error = true;
        }
    }
    assert!(saw_error);
}

#[tokio::test]
async fn unavailable_device_fails_start_and_surfaces_error() {
    let mut factory = ScriptedBackendFactory::new();
    factory.push(
        SourceKind::Microphone,
        ScriptedBackend::new(SourceKind::Microphone).failing("device not present"),
    );
    let mut h = spawn_harness(
        factory,
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    let err = h.handle.start("note-a").await.unwrap_err();
    assert!(matches!(err, notevox_foundation::AppError::NotInitialised));

    settle().await;
    let mut saw_error = false;
    while let Ok(event) = h.events.try_recv() {
        if let SessionEvent::StateChanged(SessionState::Error { message }) = event {
            assert!(message.contains("device not present"));
            saw_error = true;
        }
    }
    assert!(saw_error);
}

// ─── Grace Period Policy ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn returning_within_the_grace_period_never_stops() {
    let mut factory = ScriptedBackendFactory::new();
    factory.push(SourceKind::Microphone, ScriptedBackend::new(SourceKind::Microphone));
    let h = spawn_harness(
        factory,
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    h.handle.start("note-a").await.unwrap();
    h.handle.focus_lost(Some("note-b")).await.unwrap();

    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;
    h.handle.focus_gained("note-a").await.unwrap();

    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;

    let status = h.handle.status().await.unwrap();
    assert!(status.is_recording, "canceled grace stop must never fire");
}

#[tokio::test(start_paused = true)]
async fn staying_away_past_the_grace_period_stops_exactly_once() {
    let mut factory = ScriptedBackendFactory::new();
    factory.push(SourceKind::Microphone, ScriptedBackend::new(SourceKind::Microphone));
    let mut h = spawn_harness(
        factory,
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    h.handle.start("note-a").await.unwrap();
    h.handle.focus_lost(Some("note-b")).await.unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    settle().await;

    let status = h.handle.status().await.unwrap();
    assert!(!status.is_recording);

    // Exactly one stop: one Processing transition, one final transcript.
    let mut processing = 0;
    let mut transcripts = 0;
    while let Ok(event) = h.events.try_recv() {
        match event {
            SessionEvent::StateChanged(SessionState::Processing) => processing += 1,
            SessionEvent::Transcript { ref note_id, .. } => {
                assert_eq!(note_id, "note-a");
                transcripts += 1;
            }
            _ => {}
        }
    }
    assert_eq!(processing, 1);
    assert_eq!(transcripts, 1);
}

#[tokio::test(start_paused = true)]
async fn focus_moving_to_the_recorded_note_does_not_arm_a_stop() {
    let mut factory = ScriptedBackendFactory::new();
    factory.push(SourceKind::Microphone, ScriptedBackend::new(SourceKind::Microphone));
    let h = spawn_harness(
        factory,
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    h.handle.start("note-a").await.unwrap();
    h.handle.focus_lost(Some("note-a")).await.unwrap();

    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;

    assert!(h.handle.status().await.unwrap().is_recording);
}

#[tokio::test(start_paused = true)]
async fn starting_a_new_session_cancels_a_pending_grace_stop() {
    let mut factory = ScriptedBackendFactory::new();
    factory.push(SourceKind::Microphone, ScriptedBackend::new(SourceKind::Microphone));
    factory.push(SourceKind::Microphone, ScriptedBackend::new(SourceKind::Microphone));
    let h = spawn_harness(
        factory,
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    h.handle.start("note-a").await.unwrap();
    h.handle.focus_lost(Some("note-b")).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;

    // A brand-new recording cancels the timer armed for note-a.
    h.handle.start("note-b").await.unwrap();
    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;

    let status = h.handle.status().await.unwrap();
    assert!(status.is_recording);
    assert_eq!(status.note_id.as_deref(), Some("note-b"));
}

// ─── Device Loss ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn mid_session_device_loss_is_surfaced_not_retried() {
    let backend = ScriptedBackend::new(SourceKind::Microphone);
    let injector = backend.loss_injector();
    let mut factory = ScriptedBackendFactory::new();
    factory.push(SourceKind::Microphone, backend);

    let mut h = spawn_harness(
        factory,
        engines_for(vec![]),
        mic_caps(),
        Duration::from_secs(30),
    );

    h.handle.start("note-a").await.unwrap();
    injector.disconnect("usb device unplugged");

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;

    let mut saw_lost = false;
    let mut saw_error = false;
    while let Ok(event) = h.events.try_recv() {
        match event {
            SessionEvent::DeviceLost { source, reason } => {
                assert_eq!(source, SourceKind::Microphone);
                assert!(reason.contains("unplugged"));
                saw_lost = true;
            }
            SessionEvent::StateChanged(SessionState::Error { .. }) => saw_error = true,
            _ => {}
        }
    }
    assert!(saw_lost);
    assert!(saw_error);
    assert!(!h.handle.status().await.unwrap().is_recording);
}
