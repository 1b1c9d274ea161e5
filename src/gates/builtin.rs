//! The five built-in gates, one per defect category.

use super::{
    DurationThresholds, EchoThresholds, Gate, HissThresholds, PitchThresholds,
    VoiceShiftThresholds,
};
use crate::features::{ContextFlags, Feature, FeatureVector};

// Callers guarantee required features are present and finite; NAN keeps every
// comparison false if that is ever violated.
fn value(features: &FeatureVector, feature: Feature) -> f64 {
    features.get(feature).unwrap_or(f64::NAN)
}

/// Duration relative to text length: catches truncated and runaway takes.
pub struct DurationOutlier {
    thresholds: DurationThresholds,
}

impl DurationOutlier {
    pub fn new(thresholds: DurationThresholds) -> Self {
        Self { thresholds }
    }
}

impl Gate for DurationOutlier {
    fn name(&self) -> &'static str {
        "duration_outlier"
    }

    fn enabled(&self) -> bool {
        self.thresholds.enabled
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::CharsPerSec]
    }

    fn check(&self, features: &FeatureVector, reasons: &mut Vec<String>) {
        let rate = value(features, Feature::CharsPerSec);
        let min = if features.context.is_closing {
            self.thresholds.closing_min_chars_per_sec
        } else {
            self.thresholds.min_chars_per_sec
        };
        // Too few characters per second means too much audio for the text
        if rate < min {
            reasons.push("duration_too_long".to_string());
        }
        if rate > self.thresholds.max_chars_per_sec {
            reasons.push("duration_too_short".to_string());
        }
    }
}

/// Sudden octave jumps and implausibly wide pitch excursions.
pub struct PitchBreakout {
    thresholds: PitchThresholds,
}

impl PitchBreakout {
    pub fn new(thresholds: PitchThresholds) -> Self {
        Self { thresholds }
    }
}

impl Gate for PitchBreakout {
    fn name(&self) -> &'static str {
        "pitch_breakout"
    }

    fn enabled(&self) -> bool {
        self.thresholds.enabled
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::MaxPitchJumpSemitones, Feature::PitchRangeSemitones]
    }

    fn check(&self, features: &FeatureVector, reasons: &mut Vec<String>) {
        if value(features, Feature::MaxPitchJumpSemitones) > self.thresholds.max_jump_semitones {
            reasons.push("pitch_breakout".to_string());
        }
        if value(features, Feature::PitchRangeSemitones) > self.thresholds.max_range_semitones {
            reasons.push("pitch_range_excessive".to_string());
        }
    }
}

/// Audible repetition or smearing.
pub struct EchoRisk {
    thresholds: EchoThresholds,
}

impl EchoRisk {
    pub fn new(thresholds: EchoThresholds) -> Self {
        Self { thresholds }
    }
}

impl Gate for EchoRisk {
    fn name(&self) -> &'static str {
        "echo_risk"
    }

    fn enabled(&self) -> bool {
        self.thresholds.enabled
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::CepstralPeak, Feature::AutocorrEcho]
    }

    fn check(&self, features: &FeatureVector, reasons: &mut Vec<String>) {
        let t = &self.thresholds;
        let cepstral = value(features, Feature::CepstralPeak);
        let autocorr = value(features, Feature::AutocorrEcho);

        // Either indicator alone is noisy; both together are an echo
        if cepstral > t.cepstral_peak_max && autocorr > t.autocorr_max {
            reasons.push("echo_combined".to_string());
        }
        if cepstral > t.cepstral_peak_hard {
            reasons.push("echo_cepstral_severe".to_string());
        }
        if autocorr > t.autocorr_hard {
            reasons.push("echo_autocorr_severe".to_string());
        }
    }
}

/// Narrator timbre discontinuity against the previous selection.
pub struct VoiceShift {
    thresholds: VoiceShiftThresholds,
}

impl VoiceShift {
    pub fn new(thresholds: VoiceShiftThresholds) -> Self {
        Self { thresholds }
    }
}

impl Gate for VoiceShift {
    fn name(&self) -> &'static str {
        "voice_shift"
    }

    fn enabled(&self) -> bool {
        self.thresholds.enabled
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::TonalDistance]
    }

    fn applies(&self, context: &ContextFlags) -> bool {
        context.has_previous && !context.is_opening
    }

    fn check(&self, features: &FeatureVector, reasons: &mut Vec<String>) {
        if value(features, Feature::TonalDistance) > self.thresholds.max_tonal_distance {
            reasons.push("voice_shift".to_string());
        }
    }
}

/// Broadband high-frequency noise.
pub struct HissRisk {
    thresholds: HissThresholds,
}

impl HissRisk {
    pub fn new(thresholds: HissThresholds) -> Self {
        Self { thresholds }
    }
}

impl Gate for HissRisk {
    fn name(&self) -> &'static str {
        "hiss_risk"
    }

    fn enabled(&self) -> bool {
        self.thresholds.enabled
    }

    fn required(&self) -> &'static [Feature] {
        &[Feature::HfFlatness, Feature::NoiseFloorDb]
    }

    fn check(&self, features: &FeatureVector, reasons: &mut Vec<String>) {
        if value(features, Feature::HfFlatness) > self.thresholds.max_hf_flatness {
            reasons.push("hiss_flatness".to_string());
        }
        if value(features, Feature::NoiseFloorDb) > self.thresholds.max_noise_floor_db {
            reasons.push("hiss_noise_floor".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasons(gate: &dyn Gate, fv: &FeatureVector) -> Vec<String> {
        let mut out = Vec::new();
        gate.check(fv, &mut out);
        out
    }

    fn vector(pairs: &[(Feature, f64)]) -> FeatureVector {
        pairs
            .iter()
            .fold(FeatureVector::default(), |fv, &(f, v)| fv.with(f, v))
    }

    #[test]
    fn duration_reports_direction() {
        let gate = DurationOutlier::new(DurationThresholds::default());
        assert_eq!(
            reasons(&gate, &vector(&[(Feature::CharsPerSec, 4.0)])),
            vec!["duration_too_long"]
        );
        assert_eq!(
            reasons(&gate, &vector(&[(Feature::CharsPerSec, 40.0)])),
            vec!["duration_too_short"]
        );
        assert!(reasons(&gate, &vector(&[(Feature::CharsPerSec, 14.0)])).is_empty());
    }

    #[test]
    fn duration_allows_slower_closing_chunks() {
        let gate = DurationOutlier::new(DurationThresholds::default());
        let mut fv = vector(&[(Feature::CharsPerSec, 6.0)]);
        assert_eq!(reasons(&gate, &fv), vec!["duration_too_long"]);

        fv.context.is_closing = true;
        assert!(reasons(&gate, &fv).is_empty());
    }

    #[test]
    fn pitch_octave_is_not_a_breakout_but_above_is() {
        let gate = PitchBreakout::new(PitchThresholds::default());
        let at = vector(&[
            (Feature::MaxPitchJumpSemitones, 12.0),
            (Feature::PitchRangeSemitones, 10.0),
        ]);
        assert!(reasons(&gate, &at).is_empty());

        let above = vector(&[
            (Feature::MaxPitchJumpSemitones, 12.5),
            (Feature::PitchRangeSemitones, 30.0),
        ]);
        assert_eq!(
            reasons(&gate, &above),
            vec!["pitch_breakout", "pitch_range_excessive"]
        );
    }

    #[test]
    fn echo_needs_both_soft_indicators() {
        let gate = EchoRisk::new(EchoThresholds::default());
        let one = vector(&[(Feature::CepstralPeak, 0.2), (Feature::AutocorrEcho, 0.1)]);
        assert!(reasons(&gate, &one).is_empty());

        let both = vector(&[(Feature::CepstralPeak, 0.2), (Feature::AutocorrEcho, 0.4)]);
        assert_eq!(reasons(&gate, &both), vec!["echo_combined"]);

        let severe = vector(&[(Feature::CepstralPeak, 0.3), (Feature::AutocorrEcho, 0.4)]);
        assert_eq!(
            reasons(&gate, &severe),
            vec!["echo_combined", "echo_cepstral_severe"]
        );
    }

    #[test]
    fn echo_hard_cap_fails_alone() {
        let gate = EchoRisk::new(EchoThresholds::default());
        let severe = vector(&[(Feature::CepstralPeak, 0.01), (Feature::AutocorrEcho, 0.7)]);
        assert_eq!(reasons(&gate, &severe), vec!["echo_autocorr_severe"]);
    }

    #[test]
    fn voice_shift_applicability() {
        let gate = VoiceShift::new(VoiceShiftThresholds::default());
        let mut ctx = ContextFlags::default();
        assert!(!gate.applies(&ctx));
        ctx.has_previous = true;
        assert!(gate.applies(&ctx));
        ctx.is_opening = true;
        assert!(!gate.applies(&ctx));

        let far = vector(&[(Feature::TonalDistance, 9.0)]);
        assert_eq!(reasons(&gate, &far), vec!["voice_shift"]);
    }

    #[test]
    fn hiss_reports_each_indicator() {
        let gate = HissRisk::new(HissThresholds::default());
        let noisy = vector(&[(Feature::HfFlatness, 0.7), (Feature::NoiseFloorDb, -30.0)]);
        assert_eq!(
            reasons(&gate, &noisy),
            vec!["hiss_flatness", "hiss_noise_floor"]
        );
        let quiet = vector(&[(Feature::HfFlatness, 0.1), (Feature::NoiseFloorDb, -70.0)]);
        assert!(reasons(&gate, &quiet).is_empty());
    }
}
