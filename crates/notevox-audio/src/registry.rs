use notevox_foundation::{AudioError, SourceKind};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Tracks which capture devices are open.
///
/// Exactly one device per source kind may be open at a time; a second
/// acquire before release fails with `DeviceUnavailable`. The registry is an
/// explicitly owned value passed to whoever builds capture backends — there
/// is no process-wide instance.
#[derive(Clone, Default)]
pub struct CaptureRegistry {
    open: Arc<Mutex<HashSet<SourceKind>>>,
}

impl CaptureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, source: SourceKind) -> Result<CaptureGuard, AudioError> {
        let mut open = self.open.lock();
        if !open.insert(source) {
            return Err(AudioError::DeviceUnavailable {
                source,
                reason: "device already open".into(),
            });
        }
        Ok(CaptureGuard {
            source,
            open: Arc::clone(&self.open),
        })
    }

    pub fn is_open(&self, source: SourceKind) -> bool {
        self.open.lock().contains(&source)
    }
}

/// Releases the device slot on drop.
pub struct CaptureGuard {
    source: SourceKind,
    open: Arc<Mutex<HashSet<SourceKind>>>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.open.lock().remove(&self.source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let registry = CaptureRegistry::new();
        let guard = registry.acquire(SourceKind::Microphone).unwrap();
        assert!(matches!(
            registry.acquire(SourceKind::Microphone),
            Err(AudioError::DeviceUnavailable { .. })
        ));

        drop(guard);
        registry.acquire(SourceKind::Microphone).unwrap();
    }

    #[test]
    fn source_kinds_are_independent() {
        let registry = CaptureRegistry::new();
        let _mic = registry.acquire(SourceKind::Microphone).unwrap();
        let _sys = registry.acquire(SourceKind::SystemAudio).unwrap();
        assert!(registry.is_open(SourceKind::Microphone));
        assert!(registry.is_open(SourceKind::SystemAudio));
    }
}
