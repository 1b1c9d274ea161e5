//! Candidate audio → feature vector.

use crate::audio::dsp::{self, SpectralAnalyzer};
use crate::audio::wav::AudioBuffer;
use crate::defaults;
use crate::error::{Result, TakepickError};
use crate::features::{ContextFlags, Feature, FeatureVector};
use crate::model::{CandidateId, Chunk};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything extraction needs besides the candidate's own audio.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionContext<'a> {
    pub candidate: CandidateId,
    pub chunk: &'a Chunk,
    /// Tail of the previous chunk's selected candidate, `None` for the first chunk.
    pub previous_tail: Option<&'a AudioBuffer>,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(candidate: CandidateId, chunk: &'a Chunk) -> Self {
        Self {
            candidate,
            chunk,
            previous_tail: None,
        }
    }

    pub fn with_previous(mut self, tail: Option<&'a AudioBuffer>) -> Self {
        self.previous_tail = tail;
        self
    }

    pub fn flags(&self) -> ContextFlags {
        ContextFlags {
            has_previous: self.previous_tail.is_some(),
            is_opening: self.chunk.is_opening,
            is_closing: self.chunk.is_closing,
        }
    }

    fn fail(&self, message: impl Into<String>) -> TakepickError {
        TakepickError::Extraction {
            chunk_index: self.candidate.chunk_index,
            version: self.candidate.version,
            message: message.into(),
        }
    }
}

/// Trait for feature extraction.
///
/// Implementations must be pure: identical audio and context produce
/// identical vectors, and nothing is shared between calls.
pub trait FeatureExtractor: Send + Sync {
    /// Compute the feature vector for one candidate.
    ///
    /// # Errors
    /// `TakepickError::Extraction` when the audio cannot be analyzed. Never
    /// returns a zeroed vector in place of an error.
    fn extract(&self, audio: &AudioBuffer, context: &ExtractionContext<'_>)
    -> Result<FeatureVector>;

    fn name(&self) -> &str;
}

/// Tunables for [`AcousticExtractor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub min_analyzable_ms: u32,
    pub continuity_window_ms: u32,
    pub voiced_rms_floor: f32,
    pub pitch_min_hz: f32,
    pub pitch_max_hz: f32,
    /// Minimum normalized autocorrelation for a frame to count as pitched.
    pub pitch_clarity: f32,
    /// Number of extraction worker threads (0 = available parallelism).
    pub workers: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_analyzable_ms: defaults::MIN_ANALYZABLE_MS,
            continuity_window_ms: defaults::CONTINUITY_WINDOW_MS,
            voiced_rms_floor: defaults::VOICED_RMS_FLOOR,
            pitch_min_hz: defaults::PITCH_MIN_HZ,
            pitch_max_hz: defaults::PITCH_MAX_HZ,
            pitch_clarity: 0.45,
            workers: 0,
        }
    }
}

/// Signal-processing extractor over decoded PCM.
#[derive(Debug, Clone, Default)]
pub struct AcousticExtractor {
    config: ExtractionConfig,
}

/// Per-frame measurements gathered in one pass.
struct FrameStats {
    voiced: bool,
    rms: f32,
    pitch_hz: Option<f32>,
    centroid_hz: f32,
    hf_flatness: Option<f32>,
}

impl AcousticExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn frame_stats(&self, audio: &AudioBuffer, analyzer: &SpectralAnalyzer) -> Vec<FrameStats> {
        let sr = audio.sample_rate();
        let nyquist = sr as f32 / 2.0;
        dsp::frames(audio.samples(), defaults::FRAME_LEN, defaults::HOP_LEN)
            .map(|frame| {
                let rms = dsp::rms(frame);
                let voiced = rms >= self.config.voiced_rms_floor;
                let mags = (rms > 1e-4).then(|| analyzer.magnitudes(frame));
                FrameStats {
                    voiced,
                    rms,
                    pitch_hz: voiced
                        .then(|| {
                            dsp::autocorr_pitch(
                                frame,
                                sr,
                                self.config.pitch_min_hz,
                                self.config.pitch_max_hz,
                                self.config.pitch_clarity,
                            )
                        })
                        .flatten(),
                    centroid_hz: mags
                        .as_ref()
                        .map(|m| dsp::spectral_centroid(m, analyzer, sr))
                        .unwrap_or(0.0),
                    hf_flatness: mags.as_ref().map(|m| {
                        dsp::band_flatness(m, analyzer, sr, defaults::HISS_BAND_HZ, nyquist)
                    }),
                }
            })
            .collect()
    }

    fn pitch_features(stats: &[FrameStats]) -> (f64, f64) {
        let track: Vec<f64> = stats
            .iter()
            .filter_map(|s| s.pitch_hz.map(|p| p as f64))
            .collect();
        let range = match (dsp::percentile(&track, 0.05), dsp::percentile(&track, 0.95)) {
            (Some(lo), Some(hi)) if track.len() >= 2 => dsp::semitones(lo, hi),
            _ => 0.0,
        };

        let max_jump = stats
            .windows(2)
            .filter_map(|w| match (w[0].pitch_hz, w[1].pitch_hz) {
                (Some(a), Some(b)) => Some(dsp::semitones(a as f64, b as f64).abs()),
                _ => None,
            })
            .fold(0.0f64, f64::max);

        (range, max_jump)
    }

    fn centroid_jump(stats: &[FrameStats]) -> f64 {
        stats
            .windows(2)
            .filter(|w| w[0].voiced && w[1].voiced)
            .filter(|w| w[0].centroid_hz > 0.0 && w[1].centroid_hz > 0.0)
            .map(|w| {
                let (a, b) = (w[0].centroid_hz as f64, w[1].centroid_hz as f64);
                (a / b).max(b / a)
            })
            .fold(1.0f64, f64::max)
    }

    fn cepstral_peak(&self, audio: &AudioBuffer) -> f64 {
        let sr = audio.sample_rate() as usize;
        let len = defaults::CEPSTRUM_LEN;
        let analyzer = SpectralAnalyzer::new(len);
        let lo = sr * defaults::ECHO_MIN_DELAY_MS as usize / 1000;
        let hi = (sr * defaults::ECHO_MAX_DELAY_MS as usize / 1000).min(len / 2 - 1);
        if lo >= hi {
            return 0.0;
        }

        let samples = audio.samples();
        let mut windows: Vec<&[f32]> = dsp::frames(samples, len, len / 2).collect();
        if windows.is_empty() {
            // Shorter than one window: analyze the whole clip zero-padded
            windows.push(samples);
        }

        let peaks: Vec<f64> = windows
            .into_iter()
            .filter(|w| dsp::rms(w) >= self.config.voiced_rms_floor)
            .map(|w| {
                analyzer.real_cepstrum(w)[lo..=hi]
                    .iter()
                    .fold(0.0f32, |m, &c| m.max(c.abs())) as f64
            })
            .collect();

        if peaks.is_empty() {
            0.0
        } else {
            peaks.iter().sum::<f64>() / peaks.len() as f64
        }
    }

    fn autocorr_echo(audio: &AudioBuffer) -> f64 {
        let sr = audio.sample_rate() as usize;
        let r = dsp::autocorrelation(audio.samples());
        let lo = sr * defaults::ECHO_MIN_DELAY_MS as usize / 1000;
        let hi = (sr * defaults::ECHO_MAX_DELAY_MS as usize / 1000).min(r.len().saturating_sub(1));
        if lo >= hi {
            return 0.0;
        }
        r[lo..=hi].iter().fold(0.0f32, |m, &v| m.max(v)) as f64
    }

    /// Distance between the audible end of `previous_tail` and the audible
    /// start of `audio`; silence at either edge is skipped.
    fn tonal_distance(
        &self,
        audio: &AudioBuffer,
        previous_tail: &AudioBuffer,
        analyzer: &SpectralAnalyzer,
    ) -> Option<f64> {
        let window = self.config.continuity_window_ms;
        let floor = self.config.voiced_rms_floor;
        let sr = audio.sample_rate();
        let lo = 80.0;
        let hi = (sr as f32 / 2.0).min(8000.0);
        let head = dsp::band_profile(
            audio.audible_head(window, floor)?,
            analyzer,
            sr,
            defaults::TONAL_BANDS,
            lo,
            hi,
            floor,
        )?;
        let tail = dsp::band_profile(
            previous_tail.audible_tail(window, floor)?,
            analyzer,
            previous_tail.sample_rate(),
            defaults::TONAL_BANDS,
            lo,
            hi,
            floor,
        )?;
        Some(dsp::profile_distance(&tail, &head))
    }
}

impl FeatureExtractor for AcousticExtractor {
    fn extract(
        &self,
        audio: &AudioBuffer,
        context: &ExtractionContext<'_>,
    ) -> Result<FeatureVector> {
        if audio.is_empty() {
            return Err(context.fail("no samples decoded"));
        }
        if audio.duration_ms() < self.config.min_analyzable_ms as u64 {
            return Err(context.fail(format!(
                "audio is {} ms, shorter than the {} ms minimum",
                audio.duration_ms(),
                self.config.min_analyzable_ms
            )));
        }
        if audio.samples().iter().any(|s| !s.is_finite()) {
            return Err(context.fail("decoded samples contain non-finite values"));
        }

        let analyzer = SpectralAnalyzer::new(defaults::FRAME_LEN);
        let stats = self.frame_stats(audio, &analyzer);

        let duration = audio.duration_secs();
        let (pitch_range, max_jump) = Self::pitch_features(&stats);

        let levels: Vec<f64> = stats.iter().map(|s| dsp::to_db(s.rms as f64)).collect();
        let noise_floor = dsp::percentile(&levels, 0.10).unwrap_or(dsp::DB_FLOOR);

        let flatness: Vec<f64> = stats
            .iter()
            .filter_map(|s| s.hf_flatness.map(|f| f as f64))
            .collect();
        let hf_flatness = if flatness.is_empty() {
            0.0
        } else {
            flatness.iter().sum::<f64>() / flatness.len() as f64
        };

        let mut fv = FeatureVector::new(context.flags())
            .with(Feature::DurationSecs, duration)
            .with(
                Feature::CharsPerSec,
                context.chunk.chars() as f64 / duration,
            )
            .with(Feature::PitchRangeSemitones, pitch_range)
            .with(Feature::MaxPitchJumpSemitones, max_jump)
            .with(Feature::CentroidJumpRatio, Self::centroid_jump(&stats))
            .with(Feature::CepstralPeak, self.cepstral_peak(audio))
            .with(Feature::AutocorrEcho, Self::autocorr_echo(audio))
            .with(Feature::HfFlatness, hf_flatness)
            .with(Feature::NoiseFloorDb, noise_floor);

        // Without an audible edge on both sides there is no continuity context
        let distance = context
            .previous_tail
            .and_then(|prev| self.tonal_distance(audio, prev, &analyzer))
            .filter(|d| d.is_finite());
        match distance {
            Some(d) => fv.set(Feature::TonalDistance, d),
            None => fv.context.has_previous = false,
        }

        Ok(fv)
    }

    fn name(&self) -> &str {
        "acoustic"
    }
}

/// Mock extractor for testing: returns preset vectors keyed by candidate.
#[derive(Debug, Clone, Default)]
pub struct MockExtractor {
    vectors: HashMap<CandidateId, FeatureVector>,
    failures: Vec<CandidateId>,
    fallback: FeatureVector,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector returned for candidates without a preset.
    pub fn with_fallback(mut self, fallback: FeatureVector) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_vector(mut self, id: CandidateId, vector: FeatureVector) -> Self {
        self.vectors.insert(id, vector);
        self
    }

    pub fn with_failure(mut self, id: CandidateId) -> Self {
        self.failures.push(id);
        self
    }
}

impl FeatureExtractor for MockExtractor {
    fn extract(
        &self,
        _audio: &AudioBuffer,
        context: &ExtractionContext<'_>,
    ) -> Result<FeatureVector> {
        if self.failures.contains(&context.candidate) {
            return Err(context.fail("mock extraction failure"));
        }
        let mut fv = self
            .vectors
            .get(&context.candidate)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        fv.context = context.flags();
        Ok(fv)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = defaults::SAMPLE_RATE;

    /// Voiced-like test signal: a harmonic tone with a gentle vibrato-free envelope.
    fn tone(hz: f32, secs: f32, amp: f32) -> Vec<f32> {
        let n = (SR as f32 * secs) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SR as f32;
                let w = 2.0 * std::f32::consts::PI * hz * t;
                amp * (w.sin() + 0.5 * (2.0 * w).sin() + 0.25 * (3.0 * w).sin()) / 1.75
            })
            .collect()
    }

    fn chunk() -> Chunk {
        Chunk::new(1, "The quick brown fox jumps over the lazy dog.")
    }

    fn ctx(chunk: &Chunk) -> ExtractionContext<'_> {
        ExtractionContext::new(
            CandidateId {
                chunk_index: chunk.index,
                version: 0,
            },
            chunk,
        )
    }

    #[test]
    fn rejects_audio_below_minimum_length() {
        let chunk = chunk();
        let audio = AudioBuffer::new(tone(150.0, 0.1, 0.3), SR);
        let result = AcousticExtractor::default().extract(&audio, &ctx(&chunk));

        match result {
            Err(TakepickError::Extraction {
                chunk_index,
                version,
                message,
            }) => {
                assert_eq!(chunk_index, 1);
                assert_eq!(version, 0);
                assert!(message.contains("shorter than"));
            }
            other => panic!("Expected Extraction error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_empty_audio() {
        let chunk = chunk();
        let audio = AudioBuffer::new(Vec::new(), SR);
        assert!(AcousticExtractor::default().extract(&audio, &ctx(&chunk)).is_err());
    }

    #[test]
    fn extraction_is_bit_identical_on_repeat() {
        let chunk = chunk();
        let audio = AudioBuffer::new(tone(140.0, 1.0, 0.3), SR);
        let extractor = AcousticExtractor::default();

        let a = extractor.extract(&audio, &ctx(&chunk)).unwrap();
        let b = extractor.extract(&audio, &ctx(&chunk)).unwrap();
        for feature in Feature::ALL {
            assert_eq!(
                a.get(feature).map(f64::to_bits),
                b.get(feature).map(f64::to_bits),
                "{} differs",
                feature
            );
        }
    }

    #[test]
    fn steady_tone_has_no_pitch_breakout() {
        let chunk = chunk();
        let audio = AudioBuffer::new(tone(140.0, 1.0, 0.3), SR);
        let fv = AcousticExtractor::default().extract(&audio, &ctx(&chunk)).unwrap();

        assert!((fv.get(Feature::DurationSecs).unwrap() - 1.0).abs() < 1e-9);
        assert!((fv.get(Feature::CharsPerSec).unwrap() - 44.0).abs() < 1e-9);
        assert!(fv.get(Feature::MaxPitchJumpSemitones).unwrap() < 1.0);
        assert!(fv.get(Feature::PitchRangeSemitones).unwrap() < 1.0);
        assert_eq!(fv.get(Feature::TonalDistance), None);
        assert!(!fv.context.has_previous);
    }

    #[test]
    fn octave_jump_is_measured() {
        let chunk = chunk();
        let mut samples = tone(120.0, 0.5, 0.3);
        samples.extend(tone(240.0, 0.5, 0.3));
        let audio = AudioBuffer::new(samples, SR);
        let fv = AcousticExtractor::default().extract(&audio, &ctx(&chunk)).unwrap();

        let jump = fv.get(Feature::MaxPitchJumpSemitones).unwrap();
        assert!(jump > 10.0, "expected an octave-sized jump, got {}", jump);
    }

    fn noise(seed: u32, secs: f32, amp: f32) -> Vec<f32> {
        let mut state = seed;
        (0..(SR as f32 * secs) as usize)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                amp * (((state >> 16) as f32 / 32768.0) - 1.0)
            })
            .collect()
    }

    #[test]
    fn tonal_distance_present_with_previous_context() {
        let chunk = chunk();
        let shared = noise(7, 0.5, 0.2);
        // previous ends with exactly the audio the next candidate starts with
        let mut prev_samples = noise(3, 0.5, 0.2);
        prev_samples.extend_from_slice(&shared);
        let mut same_samples = shared.clone();
        same_samples.extend(noise(11, 0.5, 0.2));

        let previous = AudioBuffer::new(prev_samples, SR);
        let same = AudioBuffer::new(same_samples, SR);
        let different = AudioBuffer::new(tone(330.0, 1.0, 0.3), SR);
        let extractor = AcousticExtractor::default();
        let context = ctx(&chunk).with_previous(Some(&previous));

        let near = extractor.extract(&same, &context).unwrap();
        let far = extractor.extract(&different, &context).unwrap();

        assert!(near.context.has_previous);
        let near_d = near.get(Feature::TonalDistance).unwrap();
        let far_d = far.get(Feature::TonalDistance).unwrap();
        assert!(near_d < 1e-9, "got {}", near_d);
        assert!(far_d > 1.0, "got {}", far_d);
    }

    #[test]
    fn trailing_silence_in_previous_take_does_not_inflate_tonal_distance() {
        let chunk = chunk();
        let mut prev_samples = tone(140.0, 1.0, 0.3);
        prev_samples.extend(vec![0.0; (SR as f32 * 0.6) as usize]);
        let previous = AudioBuffer::new(prev_samples, SR);
        let same = AudioBuffer::new(tone(140.0, 1.0, 0.3), SR);
        let context = ctx(&chunk).with_previous(Some(&previous));

        let fv = AcousticExtractor::default().extract(&same, &context).unwrap();

        assert!(fv.context.has_previous);
        let d = fv.get(Feature::TonalDistance).unwrap();
        assert!(d < 3.0, "got {}", d);
        let results = crate::gates::GatePipeline::new(&crate::gates::ThresholdConfig::default())
            .evaluate(&fv);
        let vs = results.iter().find(|r| r.gate == "voice_shift").unwrap();
        assert!(vs.passed && !vs.skipped);
    }

    #[test]
    fn silent_previous_take_drops_continuity_context() {
        let chunk = chunk();
        let previous = AudioBuffer::new(vec![0.0; SR as usize], SR);
        let audio = AudioBuffer::new(tone(140.0, 1.0, 0.3), SR);
        let context = ctx(&chunk).with_previous(Some(&previous));

        let fv = AcousticExtractor::default().extract(&audio, &context).unwrap();

        assert_eq!(fv.get(Feature::TonalDistance), None);
        assert!(!fv.context.has_previous);
        let results = crate::gates::GatePipeline::new(&crate::gates::ThresholdConfig::default())
            .evaluate(&fv);
        let vs = results.iter().find(|r| r.gate == "voice_shift").unwrap();
        assert!(vs.skipped && vs.passed);
        assert!(vs.reasons.is_empty());
    }

    #[test]
    fn silence_has_floor_level_noise() {
        let chunk = chunk();
        let audio = AudioBuffer::new(vec![0.0; SR as usize], SR);
        let fv = AcousticExtractor::default().extract(&audio, &ctx(&chunk)).unwrap();

        assert_eq!(fv.get(Feature::NoiseFloorDb), Some(dsp::DB_FLOOR));
        assert_eq!(fv.get(Feature::HfFlatness), Some(0.0));
        assert_eq!(fv.get(Feature::CepstralPeak), Some(0.0));
    }

    #[test]
    fn mock_extractor_returns_presets_and_failures() {
        let chunk = chunk();
        let id = CandidateId {
            chunk_index: 1,
            version: 0,
        };
        let preset = FeatureVector::default().with(Feature::HfFlatness, 0.9);
        let audio = AudioBuffer::new(vec![0.0; 10], SR);

        let mock = MockExtractor::new().with_vector(id, preset);
        let fv = mock.extract(&audio, &ctx(&chunk)).unwrap();
        assert_eq!(fv.get(Feature::HfFlatness), Some(0.9));

        let failing = MockExtractor::new().with_failure(id);
        assert!(failing.extract(&audio, &ctx(&chunk)).is_err());
    }

    #[test]
    fn extractor_trait_is_object_safe() {
        let extractor: Box<dyn FeatureExtractor> = Box::new(AcousticExtractor::default());
        assert_eq!(extractor.name(), "acoustic");
    }
}
