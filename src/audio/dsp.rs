//! Numeric building blocks for acoustic feature extraction.
//!
//! Everything here is a pure function of its inputs. FFT plans are built per
//! analyzer instance so that extraction workers never share mutable state.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Lowest value returned by [`to_db`], standing in for digital silence.
pub const DB_FLOOR: f64 = -120.0;

/// Iterate fixed-length frames with the given hop. A trailing partial frame is dropped.
pub fn frames(samples: &[f32], frame_len: usize, hop: usize) -> impl Iterator<Item = &[f32]> {
    let count = if samples.len() < frame_len || hop == 0 {
        0
    } else {
        (samples.len() - frame_len) / hop + 1
    };
    (0..count).map(move |i| &samples[i * hop..i * hop + frame_len])
}

/// Sample range from the first to the last frame whose RMS reaches `floor`,
/// or `None` when no frame does. A span touching either edge extends to it.
pub fn audible_span(
    samples: &[f32],
    frame_len: usize,
    hop: usize,
    floor: f32,
) -> Option<(usize, usize)> {
    let levels: Vec<bool> = frames(samples, frame_len, hop)
        .map(|f| rms(f) >= floor)
        .collect();
    let first = levels.iter().position(|&a| a)?;
    let last = levels.iter().rposition(|&a| a)?;
    let start = if first == 0 { 0 } else { first * hop };
    let end = if last + 1 == levels.len() {
        samples.len()
    } else {
        last * hop + frame_len
    };
    Some((start, end))
}

/// Root mean square of a frame.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / frame.len() as f64).sqrt() as f32
}

/// Amplitude to dBFS, floored at [`DB_FLOOR`].
pub fn to_db(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        return DB_FLOOR;
    }
    (20.0 * amplitude.log10()).max(DB_FLOOR)
}

/// Frequency ratio expressed in semitones.
pub fn semitones(from_hz: f64, to_hz: f64) -> f64 {
    12.0 * (to_hz / from_hz).log2()
}

/// Value at percentile `p` (0.0..=1.0) using nearest-rank on a sorted copy.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    Some(sorted[rank])
}

fn hann(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (len - 1) as f32).cos()
        })
        .collect()
}

/// Windowed magnitude spectra for a fixed frame length.
pub struct SpectralAnalyzer {
    len: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl SpectralAnalyzer {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            len,
            window: hann(len),
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Magnitudes of bins `0..=len/2`. Short frames are zero-padded.
    pub fn magnitudes(&self, frame: &[f32]) -> Vec<f32> {
        let mut buf = vec![Complex::new(0.0f32, 0.0); self.len];
        for (i, (&s, &w)) in frame.iter().zip(self.window.iter()).enumerate() {
            buf[i] = Complex::new(s * w, 0.0);
        }
        self.forward.process(&mut buf);
        buf[..=self.len / 2].iter().map(|c| c.norm()).collect()
    }

    /// Frequency in Hz of bin `k`.
    pub fn bin_hz(&self, k: usize, sample_rate: u32) -> f32 {
        k as f32 * sample_rate as f32 / self.len as f32
    }

    /// Real cepstrum of a frame (first `len/2` quefrency bins).
    pub fn real_cepstrum(&self, frame: &[f32]) -> Vec<f32> {
        let mags = self.magnitudes(frame);
        let mut buf = vec![Complex::new(0.0f32, 0.0); self.len];
        for k in 0..self.len {
            // Mirror the half spectrum so the inverse is real
            let m = if k <= self.len / 2 {
                mags[k]
            } else {
                mags[self.len - k]
            };
            buf[k] = Complex::new(m.max(1e-9).ln(), 0.0);
        }
        self.inverse.process(&mut buf);
        let scale = 1.0 / self.len as f32;
        buf[..self.len / 2].iter().map(|c| c.re * scale).collect()
    }
}

/// Power-weighted mean frequency of a magnitude spectrum.
pub fn spectral_centroid(mags: &[f32], analyzer: &SpectralAnalyzer, sample_rate: u32) -> f32 {
    let mut weighted = 0.0f64;
    let mut total = 0.0f64;
    for (k, &m) in mags.iter().enumerate() {
        let p = (m as f64) * (m as f64);
        weighted += analyzer.bin_hz(k, sample_rate) as f64 * p;
        total += p;
    }
    if total <= 0.0 {
        0.0
    } else {
        (weighted / total) as f32
    }
}

/// Geometric over arithmetic mean of power in `[lo_hz, hi_hz)`; 1.0 is white noise.
pub fn band_flatness(
    mags: &[f32],
    analyzer: &SpectralAnalyzer,
    sample_rate: u32,
    lo_hz: f32,
    hi_hz: f32,
) -> f32 {
    let mut log_sum = 0.0f64;
    let mut sum = 0.0f64;
    let mut n = 0usize;
    for (k, &m) in mags.iter().enumerate() {
        let hz = analyzer.bin_hz(k, sample_rate);
        if hz < lo_hz || hz >= hi_hz {
            continue;
        }
        let p = ((m as f64) * (m as f64)).max(1e-20);
        log_sum += p.ln();
        sum += p;
        n += 1;
    }
    if n == 0 || sum <= 0.0 {
        return 0.0;
    }
    let geometric = (log_sum / n as f64).exp();
    let arithmetic = sum / n as f64;
    (geometric / arithmetic) as f32
}

/// Fundamental frequency of a frame by normalized autocorrelation.
///
/// Returns `None` when no lag in the pitch range correlates above `min_clarity`.
pub fn autocorr_pitch(
    frame: &[f32],
    sample_rate: u32,
    min_hz: f32,
    max_hz: f32,
    min_clarity: f32,
) -> Option<f32> {
    let min_lag = (sample_rate as f32 / max_hz).floor() as usize;
    let max_lag = ((sample_rate as f32 / min_hz).ceil() as usize).min(frame.len().saturating_sub(1));
    if min_lag == 0 || min_lag >= max_lag {
        return None;
    }

    let energy: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    if energy <= 0.0 {
        return None;
    }

    let mut best_lag = 0usize;
    let mut best_r = 0.0f64;
    for lag in min_lag..=max_lag {
        let r: f64 = frame[..frame.len() - lag]
            .iter()
            .zip(&frame[lag..])
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum::<f64>()
            / energy;
        if r > best_r {
            best_r = r;
            best_lag = lag;
        }
    }

    if best_lag == 0 || best_r < min_clarity as f64 {
        return None;
    }
    Some(sample_rate as f32 / best_lag as f32)
}

/// Full normalized autocorrelation of a signal via FFT (`r[0] == 1`).
pub fn autocorrelation(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = (samples.len() * 2).next_power_of_two();
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f32>> = samples
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(n)
        .collect();
    forward.process(&mut buf);
    for c in buf.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    inverse.process(&mut buf);

    let r0 = buf[0].re;
    if r0 <= 0.0 {
        return vec![0.0; samples.len()];
    }
    buf[..samples.len()].iter().map(|c| c.re / r0).collect()
}

/// Mean log-magnitude in `bands` log-spaced bands between `lo_hz` and `hi_hz`,
/// centered so that overall loudness does not contribute.
///
/// Only frames whose RMS reaches `min_rms` count; `None` when there are none.
pub fn band_profile(
    samples: &[f32],
    analyzer: &SpectralAnalyzer,
    sample_rate: u32,
    bands: usize,
    lo_hz: f32,
    hi_hz: f32,
    min_rms: f32,
) -> Option<Vec<f64>> {
    let hop = analyzer.len() / 2;
    let mut sums = vec![0.0f64; bands];
    let mut counts = vec![0usize; bands];
    let ratio = (hi_hz / lo_hz).ln();
    let mut frames_used = 0usize;

    for frame in frames(samples, analyzer.len(), hop.max(1)).filter(|f| rms(f) >= min_rms) {
        let mags = analyzer.magnitudes(frame);
        frames_used += 1;
        for (k, &m) in mags.iter().enumerate() {
            let hz = analyzer.bin_hz(k, sample_rate);
            if hz < lo_hz || hz >= hi_hz {
                continue;
            }
            let band = (((hz / lo_hz).ln() / ratio) * bands as f32) as usize;
            let band = band.min(bands - 1);
            sums[band] += to_db(m as f64);
            counts[band] += 1;
        }
    }

    if frames_used == 0 || counts.iter().any(|&c| c == 0) {
        return None;
    }
    let means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| s / c as f64)
        .collect();
    let center = means.iter().sum::<f64>() / bands as f64;
    Some(means.into_iter().map(|m| m - center).collect())
}

/// RMS difference between two equally sized profiles.
pub fn profile_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::NAN;
    }
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (sum / a.len() as f64).sqrt()
}
