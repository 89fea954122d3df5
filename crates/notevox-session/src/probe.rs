use notevox_foundation::SourceKind;

/// What the host can capture, gathered once before pipeline construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub microphone: bool,
    pub system_audio: bool,
}

impl CapabilityFlags {
    /// Probe the audio host for available capture paths.
    pub fn probe() -> Self {
        Self {
            microphone: notevox_audio::microphone_available(),
            system_audio: notevox_audio::system_audio_available(),
        }
    }
}

/// Closed set of pipeline shapes; every call site matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    SingleSource,
    DualSource,
}

impl PipelineMode {
    pub fn sources(&self) -> &'static [SourceKind] {
        match self {
            PipelineMode::SingleSource => &[SourceKind::Microphone],
            PipelineMode::DualSource => &SourceKind::ALL,
        }
    }
}

/// Pure function of capability flags — never of UI state.
pub fn select_pipeline(flags: &CapabilityFlags) -> PipelineMode {
    if flags.microphone && flags.system_audio {
        PipelineMode::DualSource
    } else {
        PipelineMode::SingleSource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_capabilities_select_dual_source() {
        let flags = CapabilityFlags { microphone: true, system_audio: true };
        assert_eq!(select_pipeline(&flags), PipelineMode::DualSource);
        assert_eq!(PipelineMode::DualSource.sources().len(), 2);
    }

    #[test]
    fn missing_loopback_falls_back_to_single_source() {
        let flags = CapabilityFlags { microphone: true, system_audio: false };
        assert_eq!(select_pipeline(&flags), PipelineMode::SingleSource);
        assert_eq!(
            PipelineMode::SingleSource.sources(),
            &[SourceKind::Microphone]
        );
    }

    #[test]
    fn selection_is_deterministic() {
        let flags = CapabilityFlags { microphone: false, system_audio: true };
        assert_eq!(select_pipeline(&flags), select_pipeline(&flags));
    }
}
