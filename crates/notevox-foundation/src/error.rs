use crate::SourceKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Recognition pipeline is not initialised")]
    NotInitialised,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker channel broken: {0}")]
    ChannelBroken(String),

    #[error("Processing timed out")]
    ProcessingTimeout,

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Capture device unavailable for {source}: {reason}")]
    DeviceUnavailable { source: SourceKind, reason: String },

    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("CPAL error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),
}

/// How the coordinator reacts to a failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Handled inside the coordinator; the caller never sees a failure.
    Silent,
    /// Resolve by falling back to the interim text already received.
    FallbackToInterim,
    /// Persist what could not be delivered, then exit gracefully.
    PersistAndExit,
    /// Expose via status/state change; the UI owns display and retry.
    Surface,
}

impl AppError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            AppError::ProcessingTimeout => RecoveryStrategy::FallbackToInterim,
            AppError::ChannelBroken(_) => RecoveryStrategy::PersistAndExit,
            AppError::Audio(_)
            | AppError::PermissionDenied(_)
            | AppError::NotInitialised
            | AppError::Config(_)
            | AppError::Fatal(_) => RecoveryStrategy::Surface,
        }
    }
}
