pub mod clock;
pub mod error;
pub mod state;

pub use clock::*;
pub use error::*;
pub use state::*;

use serde::{Deserialize, Serialize};

/// Identity of an audio capture source feeding a session.
///
/// The set is closed: capability probing decides which of these a pipeline
/// uses, and every call site matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    Microphone,
    SystemAudio,
}

impl SourceKind {
    /// Stable presentation order for aggregation and labels.
    pub const ALL: [SourceKind; 2] = [SourceKind::Microphone, SourceKind::SystemAudio];

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Microphone => "Microphone",
            SourceKind::SystemAudio => "System Audio",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::error::Error for SourceKind {}
