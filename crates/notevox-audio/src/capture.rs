use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::registry::CaptureRegistry;
use crate::CapturedFrame;
use notevox_foundation::{AudioError, SourceKind};

/// A capture path for one source kind.
///
/// Implementations push frames to the sink at the device's native cadence
/// from `start` until `stop` returns; no frame is delivered after that.
pub trait CaptureBackend: Send + Sync {
    fn source(&self) -> SourceKind;

    /// Open the device/tap and begin delivery. Fails with
    /// `DeviceUnavailable` when the underlying device cannot be created.
    fn start(&mut self, sink: Sender<CapturedFrame>) -> Result<(), AudioError>;

    /// Idempotent; releases the device.
    fn stop(&mut self);

    /// Reason the stream died since `start`, if it did.
    fn loss(&self) -> Option<String>;
}

/// Input devices that expose a system/loopback tap advertise it in their
/// name on every host API we target.
const LOOPBACK_NAME_HINTS: &[&str] = &["monitor", "loopback", "stereo mix", "blackhole"];

fn find_device(source: SourceKind) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match source {
        SourceKind::Microphone => {
            host.default_input_device()
                .ok_or_else(|| AudioError::DeviceUnavailable {
                    source,
                    reason: "no default input device".into(),
                })
        }
        SourceKind::SystemAudio => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceUnavailable {
                    source,
                    reason: e.to_string(),
                })?;
            for device in devices {
                if let Ok(name) = device.name() {
                    let lower = name.to_lowercase();
                    if LOOPBACK_NAME_HINTS.iter().any(|hint| lower.contains(hint)) {
                        return Ok(device);
                    }
                }
            }
            Err(AudioError::DeviceUnavailable {
                source,
                reason: "no loopback/monitor input device".into(),
            })
        }
    }
}

pub fn microphone_available() -> bool {
    find_device(SourceKind::Microphone).is_ok()
}

pub fn system_audio_available() -> bool {
    find_device(SourceKind::SystemAudio).is_ok()
}

/// CPAL capture on a dedicated thread that owns the (non-Send) stream.
pub struct CpalBackend {
    source: SourceKind,
    registry: CaptureRegistry,
    running: Arc<AtomicBool>,
    lost: Arc<Mutex<Option<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl CpalBackend {
    pub fn new(source: SourceKind, registry: CaptureRegistry) -> Self {
        Self {
            source,
            registry,
            running: Arc::new(AtomicBool::new(false)),
            lost: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }
}

impl CaptureBackend for CpalBackend {
    fn source(&self) -> SourceKind {
        self.source
    }

    fn start(&mut self, sink: Sender<CapturedFrame>) -> Result<(), AudioError> {
        if self.handle.is_some() {
            return Err(AudioError::DeviceUnavailable {
                source: self.source,
                reason: "capture already started".into(),
            });
        }

        let guard = self.registry.acquire(self.source)?;
        let source = self.source;
        let running = Arc::clone(&self.running);
        let lost = Arc::clone(&self.lost);
        *lost.lock() = None;
        running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();

        let handle = thread::Builder::new()
            .name(format!("capture-{}", source.label().to_lowercase().replace(' ', "-")))
            .spawn({
                let running = Arc::clone(&running);
                move || {
                    // The guard lives on this thread; dropping it on exit
                    // releases the device slot.
                    let _guard = guard;
                    let stream =
                        match open_stream(source, sink, Arc::clone(&running), Arc::clone(&lost)) {
                            Ok(stream) => {
                                let _ = ready_tx.send(Ok(()));
                                stream
                            }
                            Err(e) => {
                                let _ = ready_tx.send(Err(e));
                                return;
                            }
                        };

                    while running.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(25));
                    }
                    drop(stream);
                    tracing::debug!("{} capture thread exiting", source);
                }
            })
            .map_err(|e| AudioError::DeviceUnavailable {
                source,
                reason: format!("failed to spawn capture thread: {e}"),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.handle = Some(handle);
                tracing::info!("{} capture started", self.source);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(AudioError::DeviceUnavailable {
                    source: self.source,
                    reason: "capture thread died during startup".into(),
                })
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("{} capture stopped", self.source);
        }
    }

    fn loss(&self) -> Option<String> {
        self.lost.lock().clone()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(
    source: SourceKind,
    sink: Sender<CapturedFrame>,
    running: Arc<AtomicBool>,
    lost: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, AudioError> {
    let device = find_device(source)?;
    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceUnavailable {
            source,
            reason: format!("no default input config: {e}"),
        })?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();

    tracing::info!(
        "Opening {} stream: {} Hz, {} ch, {:?}",
        source,
        sample_rate,
        channels,
        sample_format
    );

    let err_fn = {
        let running = Arc::clone(&running);
        move |err: cpal::StreamError| {
            tracing::error!("{} stream error: {}", source, err);
            *lost.lock() = Some(err.to_string());
            running.store(false, Ordering::SeqCst);
        }
    };

    let deliver = move |samples: Vec<i16>| {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        let frame = CapturedFrame {
            samples: samples.into(),
            sample_rate,
            channels,
            source,
            captured_at: Instant::now(),
        };
        if sink.try_send(frame).is_err() {
            // Consumer is behind or gone; dropping here is the only option
            // that keeps the device callback non-blocking.
            tracing::trace!("{} frame dropped: sink full", source);
        }
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| deliver(data.to_vec()),
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                deliver(data.iter().map(|&s| (s as i32 - 32768) as i16).collect())
            },
            err_fn,
            None,
        )?,
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                deliver(
                    data.iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect(),
                )
            },
            err_fn,
            None,
        )?,
        other => {
            return Err(AudioError::FormatNotSupported {
                format: format!("{other:?}"),
            })
        }
    };

    stream.play()?;
    Ok(stream)
}
