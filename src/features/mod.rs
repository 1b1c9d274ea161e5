//! Acoustic feature vectors and their extraction.

pub mod cache;
pub mod extractor;

pub use cache::FeatureCache;
pub use extractor::{
    AcousticExtractor, ExtractionConfig, ExtractionContext, FeatureExtractor, MockExtractor,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named acoustic measurements. Each gate and ranker term reads a fixed subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Decoded length in seconds.
    DurationSecs,
    /// Text characters per second of audio.
    CharsPerSec,
    /// Spread between the 5th and 95th pitch percentiles, in semitones.
    PitchRangeSemitones,
    /// Largest pitch jump between adjacent voiced frames, in semitones.
    MaxPitchJumpSemitones,
    /// Largest ratio between adjacent voiced frames' spectral centroids.
    CentroidJumpRatio,
    /// Mean real-cepstrum peak in the echo delay band.
    CepstralPeak,
    /// Peak normalized autocorrelation in the echo delay band.
    AutocorrEcho,
    /// Mean spectral flatness above the hiss band edge.
    HfFlatness,
    /// 10th percentile frame level in dBFS.
    NoiseFloorDb,
    /// Band-profile distance to the previous selection's tail.
    TonalDistance,
}

impl Feature {
    pub const ALL: [Feature; 10] = [
        Feature::DurationSecs,
        Feature::CharsPerSec,
        Feature::PitchRangeSemitones,
        Feature::MaxPitchJumpSemitones,
        Feature::CentroidJumpRatio,
        Feature::CepstralPeak,
        Feature::AutocorrEcho,
        Feature::HfFlatness,
        Feature::NoiseFloorDb,
        Feature::TonalDistance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::DurationSecs => "duration_secs",
            Feature::CharsPerSec => "chars_per_sec",
            Feature::PitchRangeSemitones => "pitch_range_semitones",
            Feature::MaxPitchJumpSemitones => "max_pitch_jump_semitones",
            Feature::CentroidJumpRatio => "centroid_jump_ratio",
            Feature::CepstralPeak => "cepstral_peak",
            Feature::AutocorrEcho => "autocorr_echo",
            Feature::HfFlatness => "hf_flatness",
            Feature::NoiseFloorDb => "noise_floor_db",
            Feature::TonalDistance => "tonal_distance",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Context a vector was computed under; gates use it to decide applicability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFlags {
    /// A previous chunk's selection was available for continuity features.
    pub has_previous: bool,
    pub is_opening: bool,
    pub is_closing: bool,
}

/// Measurements for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: BTreeMap<Feature, f64>,
    pub context: ContextFlags,
}

impl FeatureVector {
    pub fn new(context: ContextFlags) -> Self {
        Self {
            values: BTreeMap::new(),
            context,
        }
    }

    pub fn with(mut self, feature: Feature, value: f64) -> Self {
        self.values.insert(feature, value);
        self
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        self.values.insert(feature, value);
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    /// Value if present and finite.
    pub fn finite(&self, feature: Feature) -> Option<f64> {
        self.get(feature).filter(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_match_serde() {
        for feature in Feature::ALL {
            let json = serde_json::to_string(&feature).unwrap();
            assert_eq!(json, format!("\"{}\"", feature.name()));
        }
    }

    #[test]
    fn vector_serializes_with_named_keys() {
        let fv = FeatureVector::default()
            .with(Feature::CharsPerSec, 14.5)
            .with(Feature::HfFlatness, 0.2);
        let json = serde_json::to_string(&fv).unwrap();
        assert!(json.contains("\"chars_per_sec\":14.5"));

        let back: FeatureVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fv);
    }

    #[test]
    fn finite_filters_nan() {
        let fv = FeatureVector::default()
            .with(Feature::TonalDistance, f64::NAN)
            .with(Feature::CepstralPeak, 0.1);
        assert!(fv.get(Feature::TonalDistance).is_some());
        assert_eq!(fv.finite(Feature::TonalDistance), None);
        assert_eq!(fv.finite(Feature::CepstralPeak), Some(0.1));
        assert_eq!(fv.finite(Feature::AutocorrEcho), None);
    }
}
