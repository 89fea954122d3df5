//! Built-in engine implementations
//!
//! `NoopEngine` keeps a pipeline runnable with no recognition backend
//! installed; `ScriptedEngine` is the deterministic double the test suites
//! drive.

use crate::types::{EngineError, EngineEvent};
use crate::RecognitionStream;
use std::collections::VecDeque;

/// Engine that never produces text.
#[derive(Debug, Default)]
pub struct NoopEngine;

impl RecognitionStream for NoopEngine {
    fn accept_frame(&mut self, _pcm: &[i16]) -> Result<Option<EngineEvent>, EngineError> {
        Ok(None)
    }

    fn finalize(&mut self) -> Result<Option<EngineEvent>, EngineError> {
        Ok(None)
    }
}

/// Engine driven by a fixed script: each `accept_frame` pops the next
/// scripted response, `finalize` returns the configured final.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: VecDeque<Result<Option<EngineEvent>, EngineError>>,
    final_event: Option<EngineEvent>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_snippet(mut self, text: &str, confidence: f32) -> Self {
        self.script.push_back(Ok(Some(EngineEvent::Snippet {
            text: text.to_string(),
            confidence,
        })));
        self
    }

    pub fn then_segment_final(mut self, text: &str, confidence: f32) -> Self {
        self.script.push_back(Ok(Some(EngineEvent::Final {
            text: text.to_string(),
            confidence,
        })));
        self
    }

    pub fn then_nothing(mut self) -> Self {
        self.script.push_back(Ok(None));
        self
    }

    pub fn then_silence_timeout(mut self) -> Self {
        self.script.push_back(Err(EngineError::SilenceTimeout));
        self
    }

    pub fn then_fatal(mut self, message: &str) -> Self {
        self.script
            .push_back(Err(EngineError::Fatal(message.to_string())));
        self
    }

    pub fn with_final(mut self, text: &str, confidence: f32) -> Self {
        self.final_event = Some(EngineEvent::Final {
            text: text.to_string(),
            confidence,
        });
        self
    }
}

impl RecognitionStream for ScriptedEngine {
    fn accept_frame(&mut self, _pcm: &[i16]) -> Result<Option<EngineEvent>, EngineError> {
        self.script.pop_front().unwrap_or(Ok(None))
    }

    fn finalize(&mut self) -> Result<Option<EngineEvent>, EngineError> {
        Ok(self.final_event.take())
    }
}
