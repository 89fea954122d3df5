//! Scripted capture backend for tests and headless runs.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

use crate::capture::CaptureBackend;
use crate::CapturedFrame;
use notevox_foundation::{AudioError, SourceKind};

/// Lets a test simulate device loss on a running scripted backend.
#[derive(Clone)]
pub struct LossInjector {
    lost: Arc<Mutex<Option<String>>>,
}

impl LossInjector {
    pub fn disconnect(&self, reason: &str) {
        *self.lost.lock() = Some(reason.to_string());
    }
}

/// Capture backend that replays a fixed frame script on `start`.
pub struct ScriptedBackend {
    source: SourceKind,
    frames: Vec<Vec<i16>>,
    sample_rate: u32,
    fail_start: Option<String>,
    lost: Arc<Mutex<Option<String>>>,
}

impl ScriptedBackend {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            frames: Vec::new(),
            sample_rate: 16_000,
            fail_start: None,
            lost: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_frames(mut self, frames: Vec<Vec<i16>>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Make `start` fail as if the device could not be opened.
    pub fn failing(mut self, reason: &str) -> Self {
        self.fail_start = Some(reason.to_string());
        self
    }

    pub fn loss_injector(&self) -> LossInjector {
        LossInjector {
            lost: Arc::clone(&self.lost),
        }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn source(&self) -> SourceKind {
        self.source
    }

    fn start(&mut self, sink: Sender<CapturedFrame>) -> Result<(), AudioError> {
        if let Some(reason) = &self.fail_start {
            return Err(AudioError::DeviceUnavailable {
                source: self.source,
                reason: reason.clone(),
            });
        }
        for samples in self.frames.drain(..) {
            let frame = CapturedFrame {
                samples: samples.into(),
                sample_rate: self.sample_rate,
                channels: 1,
                source: self.source,
                captured_at: Instant::now(),
            };
            let _ = sink.send(frame);
        }
        Ok(())
    }

    fn stop(&mut self) {}

    fn loss(&self) -> Option<String> {
        self.lost.lock().clone()
    }
}
