//! Foundation crate tests
//!
//! Tests cover:
//! - Session state transition legality
//! - Status snapshots
//! - Error taxonomy and recovery policy
//! - Clock abstraction

use notevox_foundation::clock::{test_clock, Clock};
use notevox_foundation::error::{AppError, AudioError, RecoveryStrategy};
use notevox_foundation::state::{SessionState, StateTracker};
use notevox_foundation::SourceKind;
use std::time::Duration;

// ─── State Transition Tests ─────────────────────────────────────────

#[test]
fn initial_state_is_idle() {
    let tracker = StateTracker::new();
    assert_eq!(tracker.current(), SessionState::Idle);
}

#[test]
fn full_session_lifecycle_is_legal() {
    let tracker = StateTracker::new();
    tracker.transition(SessionState::Initialising).unwrap();
    tracker
        .transition(SessionState::Recording { note_id: "note-1".into() })
        .unwrap();
    tracker.transition(SessionState::Processing).unwrap();
    tracker.transition(SessionState::Idle).unwrap();
}

#[test]
fn idle_cannot_jump_to_processing() {
    let tracker = StateTracker::new();
    let err = tracker.transition(SessionState::Processing).unwrap_err();
    assert!(matches!(err, AppError::Fatal(_)));
    assert_eq!(tracker.current(), SessionState::Idle);
}

#[test]
fn recording_cannot_jump_to_idle() {
    let tracker = StateTracker::new();
    tracker.transition(SessionState::Initialising).unwrap();
    tracker
        .transition(SessionState::Recording { note_id: "n".into() })
        .unwrap();
    assert!(tracker.transition(SessionState::Idle).is_err());
}

#[test]
fn recording_is_only_reachable_through_initialising() {
    let tracker = StateTracker::new();
    assert!(tracker
        .transition(SessionState::Recording { note_id: "n".into() })
        .is_err());
}

#[test]
fn error_is_reachable_from_any_state() {
    for setup in [
        vec![],
        vec![SessionState::Initialising],
        vec![
            SessionState::Initialising,
            SessionState::Recording { note_id: "n".into() },
        ],
        vec![
            SessionState::Initialising,
            SessionState::Recording { note_id: "n".into() },
            SessionState::Processing,
        ],
    ] {
        let tracker = StateTracker::new();
        for state in setup {
            tracker.transition(state).unwrap();
        }
        tracker
            .transition(SessionState::Error { message: "boom".into() })
            .unwrap();
    }
}

#[test]
fn error_leaves_only_through_initialising() {
    let tracker = StateTracker::new();
    tracker
        .transition(SessionState::Error { message: "denied".into() })
        .unwrap();
    assert!(tracker.transition(SessionState::Idle).is_err());
    tracker.transition(SessionState::Initialising).unwrap();
}

#[test]
fn subscribers_observe_transitions_in_order() {
    let tracker = StateTracker::new();
    let rx = tracker.subscribe();
    tracker.transition(SessionState::Initialising).unwrap();
    tracker
        .transition(SessionState::Recording { note_id: "n".into() })
        .unwrap();

    assert_eq!(rx.recv().unwrap(), SessionState::Initialising);
    assert!(rx.recv().unwrap().is_recording());
}

// ─── Status Snapshot Tests ──────────────────────────────────────────

#[test]
fn status_reflects_recording_note() {
    let tracker = StateTracker::new();
    tracker.transition(SessionState::Initialising).unwrap();
    tracker
        .transition(SessionState::Recording { note_id: "meeting".into() })
        .unwrap();

    let status = tracker.status();
    assert!(status.is_recording);
    assert!(!status.is_processing);
    assert_eq!(status.note_id.as_deref(), Some("meeting"));
}

#[test]
fn status_when_idle_is_all_false() {
    let status = StateTracker::new().status();
    assert!(!status.is_recording);
    assert!(!status.is_initialising);
    assert!(!status.is_processing);
    assert_eq!(status.note_id, None);
}

// ─── Error Taxonomy Tests ───────────────────────────────────────────

#[test]
fn device_unavailable_names_the_source() {
    let err = AudioError::DeviceUnavailable {
        source: SourceKind::SystemAudio,
        reason: "no loopback tap".into(),
    };
    let msg = format!("{}", err);
    assert!(msg.contains("System Audio"));
    assert!(msg.contains("no loopback tap"));
}

#[test]
fn app_error_from_audio_error() {
    let audio_err = AudioError::DeviceUnavailable {
        source: SourceKind::Microphone,
        reason: "unplugged".into(),
    };
    let err: AppError = audio_err.into();
    assert!(matches!(err, AppError::Audio(_)));
}

#[test]
fn processing_timeout_falls_back_to_interim() {
    assert_eq!(
        AppError::ProcessingTimeout.recovery_strategy(),
        RecoveryStrategy::FallbackToInterim
    );
}

#[test]
fn channel_broken_persists_and_exits() {
    assert_eq!(
        AppError::ChannelBroken("stdout closed".into()).recovery_strategy(),
        RecoveryStrategy::PersistAndExit
    );
}

#[test]
fn permission_denied_is_surfaced() {
    assert_eq!(
        AppError::PermissionDenied("microphone".into()).recovery_strategy(),
        RecoveryStrategy::Surface
    );
}

// ─── Clock Tests ────────────────────────────────────────────────────

#[test]
fn test_clock_advance_accumulates() {
    let clock = test_clock();
    let start = clock.now();
    clock.advance(Duration::from_millis(100));
    clock.advance(Duration::from_millis(400));
    assert_eq!(clock.now().duration_since(start), Duration::from_millis(500));
}

#[test]
fn source_kind_labels_are_stable() {
    assert_eq!(SourceKind::Microphone.label(), "Microphone");
    assert_eq!(SourceKind::SystemAudio.label(), "System Audio");
}
