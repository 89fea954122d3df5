use crate::error::AppError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Session lifecycle states.
///
/// `Error` is reachable from every state and leaves only through an explicit
/// re-initialisation on the next `start`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Initialising,
    Recording { note_id: String },
    Processing,
    Error { message: String },
}

impl SessionState {
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording { .. })
    }

    pub fn note_id(&self) -> Option<&str> {
        match self {
            SessionState::Recording { note_id } => Some(note_id),
            _ => None,
        }
    }
}

/// Snapshot answered by `status()`; a pure read, no side effects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub is_recording: bool,
    pub is_initialising: bool,
    pub is_processing: bool,
    pub note_id: Option<String>,
}

pub struct StateTracker {
    state: Arc<RwLock<SessionState>>,
    state_tx: Sender<SessionState>,
    state_rx: Receiver<SessionState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(SessionState::Idle)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: SessionState) -> Result<(), AppError> {
        let mut current = self.state.write();

        // Error is a legal target from anywhere; every other edge is explicit.
        let valid = matches!(new_state, SessionState::Error { .. })
            || matches!(
                (&*current, &new_state),
                (SessionState::Idle, SessionState::Initialising)
                    | (SessionState::Initialising, SessionState::Recording { .. })
                    | (SessionState::Initialising, SessionState::Idle)
                    | (SessionState::Recording { .. }, SessionState::Processing)
                    | (SessionState::Processing, SessionState::Idle)
                    | (SessionState::Error { .. }, SessionState::Initialising)
            );

        if !valid {
            return Err(AppError::Fatal(format!(
                "Invalid state transition: {:?} -> {:?}",
                *current, new_state
            )));
        }

        tracing::info!("Session state: {:?} -> {:?}", *current, new_state);
        *current = new_state.clone();
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.read();
        SessionStatus {
            is_recording: state.is_recording(),
            is_initialising: matches!(*state, SessionState::Initialising),
            is_processing: matches!(*state, SessionState::Processing),
            note_id: state.note_id().map(str::to_owned),
        }
    }

    /// Subscribe to state changes. Delivery context is the receiver's own;
    /// the session never runs observer code inline.
    pub fn subscribe(&self) -> Receiver<SessionState> {
        self.state_rx.clone()
    }
}
