pub mod capture;
pub mod convert;
pub mod registry;
pub mod scripted;

// Public API
pub use capture::{microphone_available, system_audio_available, CaptureBackend, CpalBackend};
pub use convert::{ConverterBank, EngineFormat, FormatConverter};
pub use registry::{CaptureGuard, CaptureRegistry};
pub use scripted::{LossInjector, ScriptedBackend};

use notevox_foundation::SourceKind;
use std::sync::Arc;
use std::time::Instant;

/// One buffer of raw capture audio, tagged with its source.
///
/// Immutable once produced; ownership moves capture -> converter -> engine.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
    pub channels: u16,
    pub source: SourceKind,
    pub captured_at: Instant,
}
