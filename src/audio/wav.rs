//! WAV decoding into the fixed analysis format.

use crate::audio::dsp;
use crate::defaults::{FRAME_LEN, HOP_LEN, SAMPLE_RATE};
use crate::error::{Result, TakepickError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Mono PCM audio at the analysis sample rate, normalized to [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap already-decoded mono samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn duration_ms(&self) -> u64 {
        (self.duration_secs() * 1000.0).round() as u64
    }

    fn samples_for_ms(&self, ms: u32) -> usize {
        (self.sample_rate as u64 * ms as u64 / 1000) as usize
    }

    /// First `ms` milliseconds (or the whole buffer if shorter).
    pub fn head(&self, ms: u32) -> &[f32] {
        let n = self.samples_for_ms(ms).min(self.samples.len());
        &self.samples[..n]
    }

    /// Last `ms` milliseconds (or the whole buffer if shorter).
    pub fn tail(&self, ms: u32) -> &[f32] {
        let n = self.samples_for_ms(ms).min(self.samples.len());
        &self.samples[self.samples.len() - n..]
    }

    /// First `ms` milliseconds after leading frames quieter than `floor`.
    /// `None` when no frame reaches the floor.
    pub fn audible_head(&self, ms: u32, floor: f32) -> Option<&[f32]> {
        let (start, end) = dsp::audible_span(&self.samples, FRAME_LEN, HOP_LEN, floor)?;
        let n = self.samples_for_ms(ms).min(end - start);
        Some(&self.samples[start..start + n])
    }

    /// Last `ms` milliseconds before trailing frames quieter than `floor`.
    /// `None` when no frame reaches the floor.
    pub fn audible_tail(&self, ms: u32, floor: f32) -> Option<&[f32]> {
        let (start, end) = dsp::audible_span(&self.samples, FRAME_LEN, HOP_LEN, floor)?;
        let n = self.samples_for_ms(ms).min(end - start);
        Some(&self.samples[end - n..end])
    }

    /// Owned copy of the audible tail, used as continuity context for the next chunk.
    pub fn audible_tail_buffer(&self, ms: u32, floor: f32) -> Option<AudioBuffer> {
        self.audible_tail(ms, floor)
            .map(|tail| AudioBuffer::new(tail.to_vec(), self.sample_rate))
    }

    /// Decode a WAV stream, downmixing to mono and resampling to the analysis rate.
    pub fn from_reader<R: Read>(reader: R, origin: &str) -> Result<Self> {
        let decode_err = |message: String| TakepickError::AudioDecode {
            path: origin.to_string(),
            message,
        };

        let mut wav_reader = hound::WavReader::new(reader)
            .map_err(|e| decode_err(format!("Failed to parse WAV file: {}", e)))?;

        let spec = wav_reader.spec();
        if spec.channels == 0 {
            return Err(decode_err("WAV header declares zero channels".to_string()));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav_reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| decode_err(format!("Failed to read WAV samples: {}", e)))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                wav_reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| decode_err(format!("Failed to read WAV samples: {}", e)))?
            }
        };

        let mono = downmix(&interleaved, spec.channels as usize);
        let samples = resample(&mono, spec.sample_rate, SAMPLE_RATE);

        Ok(Self {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }

    /// Decode a WAV file from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| TakepickError::AudioDecode {
            path: path.display().to_string(),
            message: format!("Failed to open: {}", e),
        })?;
        Self::from_reader(BufReader::new(file), &path.display().to_string())
    }
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}
