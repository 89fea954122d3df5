//! Recognition layer for NoteVox
//!
//! Defines the streaming recognition interface, the per-source runner that
//! drives it (silence-timeout restarts, confidence filtering), and the
//! multi-source transcript aggregator.

pub mod aggregator;
pub mod engines;
pub mod runner;
pub mod types;

pub use aggregator::TranscriptAggregator;
pub use engines::{NoopEngine, ScriptedEngine};
pub use runner::{RecognitionRunner, RunnerEvent, RunnerInput, RunnerMetrics};
pub use types::{
    EngineError, EngineEvent, RecognitionConfig, SnippetEvent, TranscriptEvent,
};

use notevox_foundation::SourceKind;
use std::sync::Arc;

/// Core streaming recognition interface.
///
/// One instance serves exactly one recognition run; the coordinator discards
/// it (never reuses it) across a silence-timeout restart or a stop/start
/// cycle.
pub trait RecognitionStream: Send + Sync {
    /// Feed engine-format PCM. May yield an interim snippet, a run-internal
    /// final segment, or nothing.
    fn accept_frame(&mut self, pcm: &[i16]) -> Result<Option<EngineEvent>, EngineError>;

    /// Signal end of input and collect any remaining text.
    fn finalize(&mut self) -> Result<Option<EngineEvent>, EngineError>;
}

/// Builds a fresh engine instance for a source. Called once at pipeline
/// start and again on every silence-timeout restart.
pub type EngineFactory =
    Arc<dyn Fn(SourceKind) -> Result<Box<dyn RecognitionStream>, EngineError> + Send + Sync>;
