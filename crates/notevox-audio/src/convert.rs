use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::collections::HashMap;

use crate::CapturedFrame;
use notevox_foundation::SourceKind;

/// The fixed format the recognition engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for EngineFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

/// Pure transform from one source's native buffer format to the engine
/// format: channel downmix followed by sinc resampling.
///
/// Conversion never raises; a buffer that does not match the format the
/// converter was built for is dropped and logged, since one malformed
/// buffer must not abort the stream.
pub struct FormatConverter {
    in_rate: u32,
    in_channels: u16,
    target: EngineFormat,
    /// None when in_rate == target rate (passthrough).
    resampler: Option<SincFixedIn<f32>>,
    input_buffer: Vec<f32>,
    chunk_size: usize,
}

impl FormatConverter {
    pub fn new(in_rate: u32, in_channels: u16, target: EngineFormat) -> Self {
        // 512 samples keeps the conversion latency near the capture cadence.
        let chunk_size = 512;
        let resampler = if in_rate == target.sample_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 128,
                window: WindowFunction::Blackman2,
            };
            Some(
                SincFixedIn::<f32>::new(
                    target.sample_rate as f64 / in_rate as f64,
                    2.0,
                    params,
                    chunk_size,
                    1,
                )
                .expect("resampler construction with fixed parameters cannot fail"),
            )
        };

        Self {
            in_rate,
            in_channels,
            target,
            resampler,
            input_buffer: Vec::with_capacity(chunk_size * 2),
            chunk_size,
        }
    }

    /// Convert one frame. Returns `None` when the buffer was dropped;
    /// `Some(vec)` may be empty while the resampler accumulates input.
    pub fn convert(&mut self, frame: &CapturedFrame) -> Option<Vec<i16>> {
        if frame.sample_rate != self.in_rate || frame.channels != self.in_channels {
            tracing::warn!(
                "{}: dropping malformed buffer ({} Hz/{} ch, converter expects {} Hz/{} ch)",
                frame.source,
                frame.sample_rate,
                frame.channels,
                self.in_rate,
                self.in_channels
            );
            return None;
        }

        let mono = downmix(&frame.samples, self.in_channels);

        let Some(resampler) = self.resampler.as_mut() else {
            return Some(mono);
        };

        self.input_buffer
            .extend(mono.iter().map(|&s| s as f32 / i16::MAX as f32));

        let mut out = Vec::new();
        while self.input_buffer.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.input_buffer.drain(..self.chunk_size).collect();
            match resampler.process(&[chunk], None) {
                Ok(mut resampled) => {
                    let channel = resampled.remove(0);
                    out.extend(
                        channel
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    );
                }
                Err(e) => {
                    tracing::warn!("{}: resampler failed, buffer dropped: {}", frame.source, e);
                    return None;
                }
            }
        }
        Some(out)
    }

    pub fn target(&self) -> EngineFormat {
        self.target
    }
}

fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    match channels {
        0 | 1 => samples.to_vec(),
        2 => {
            // Sum left and right; clamp instead of halving to preserve
            // perceived volume on quiet captures.
            samples
                .chunks_exact(2)
                .map(|pair| {
                    (pair[0] as i32 + pair[1] as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16
                })
                .collect()
        }
        n => samples
            .chunks_exact(n as usize)
            .map(|group| {
                (group.iter().map(|&s| s as i32).sum::<i32>() / n as i32) as i16
            })
            .collect(),
    }
}

/// Lazily-built converter cache, one per (source, native format) pair, kept
/// for the session's lifetime.
pub struct ConverterBank {
    target: EngineFormat,
    converters: HashMap<(SourceKind, u32, u16), FormatConverter>,
}

impl ConverterBank {
    pub fn new(target: EngineFormat) -> Self {
        Self {
            target,
            converters: HashMap::new(),
        }
    }

    pub fn convert(&mut self, frame: &CapturedFrame) -> Option<Vec<i16>> {
        let key = (frame.source, frame.sample_rate, frame.channels);
        let target = self.target;
        let converter = self.converters.entry(key).or_insert_with(|| {
            tracing::debug!(
                "Creating converter for {} ({} Hz/{} ch -> {} Hz/{} ch)",
                frame.source,
                frame.sample_rate,
                frame.channels,
                target.sample_rate,
                target.channels
            );
            FormatConverter::new(frame.sample_rate, frame.channels, target)
        });
        converter.convert(frame)
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}
