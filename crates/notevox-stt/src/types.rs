//! Core types for the recognition layer

use notevox_foundation::SourceKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw event produced by an engine run.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Interim text for the in-progress utterance; superseded by later
    /// snippets or a final.
    Snippet { text: String, confidence: f32 },
    /// Completed text for a finished segment or run.
    Final { text: String, confidence: f32 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Engine-internal silence timeout. Recoverable: the runner builds a
    /// fresh run and carries the accumulated text forward.
    #[error("engine silence timeout")]
    SilenceTimeout,

    #[error("engine failure: {0}")]
    Fatal(String),
}

/// Interim transcription surfaced to the aggregator and UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetEvent {
    pub session_id: u64,
    pub source: SourceKind,
    pub text: String,
    pub confidence: f32,
    pub sequence: u64,
}

/// Completed transcription for one source's recognition run.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub session_id: u64,
    pub source: SourceKind,
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
    pub duration_ms: u64,
    pub word_count: usize,
}

/// Recognition policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Snippets below this score never reach the aggregator or UI;
    /// low-confidence text is a frequent false positive on background
    /// silence.
    pub confidence_threshold: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
        }
    }
}
