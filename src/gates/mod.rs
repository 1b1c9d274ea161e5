//! Gate pipeline: named pass/fail predicates over a feature vector.
//!
//! Each gate covers one defect category and reads only its own thresholds.
//! The pipeline is a pure function of `(FeatureVector, ThresholdConfig)` and
//! holds no state, so candidates can be gated from any number of threads.

pub mod builtin;

pub use builtin::{DurationOutlier, EchoRisk, HissRisk, PitchBreakout, VoiceShift};

use crate::defaults;
use crate::error::{Result, TakepickError};
use crate::features::{ContextFlags, Feature, FeatureVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gate name used when a candidate never reached the gates.
pub const EXTRACTION_GATE: &str = "extraction";

/// Outcome of one gate for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: String,
    pub passed: bool,
    /// Gate did not apply (disabled, or its context was unavailable).
    #[serde(default)]
    pub skipped: bool,
    /// Reason codes in evaluation order; never empty when `passed` is false.
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Feature values the decision was based on.
    #[serde(default)]
    pub features: BTreeMap<Feature, f64>,
}

impl GateResult {
    pub fn skipped(gate: &str) -> Self {
        Self {
            gate: gate.to_string(),
            passed: true,
            skipped: true,
            reasons: Vec::new(),
            features: BTreeMap::new(),
        }
    }

    /// Result recorded for a candidate whose features could not be extracted.
    pub fn extraction_failed(message: &str) -> Self {
        tracing::debug!(message, "recording extraction failure as gate result");
        Self {
            gate: EXTRACTION_GATE.to_string(),
            passed: false,
            skipped: false,
            reasons: vec!["extraction_failed".to_string()],
            features: BTreeMap::new(),
        }
    }

    pub fn failed(&self) -> bool {
        !self.passed
    }
}

/// A single named predicate.
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the gate is switched on.
    fn enabled(&self) -> bool {
        true
    }

    /// Features the predicate reads. All must be present and finite.
    fn required(&self) -> &'static [Feature];

    /// Whether the gate applies under this extraction context.
    fn applies(&self, _context: &ContextFlags) -> bool {
        true
    }

    /// Push a reason code for every violated threshold.
    ///
    /// Only called once every required feature is present and finite.
    fn check(&self, features: &FeatureVector, reasons: &mut Vec<String>);
}

/// Thresholds for the duration-outlier gate, in characters per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationThresholds {
    pub enabled: bool,
    /// Below this the take is too slow for its text (runaway synthesis).
    pub min_chars_per_sec: f64,
    /// Above this the take is too fast for its text (truncation).
    pub max_chars_per_sec: f64,
    /// Lower bound used instead of `min_chars_per_sec` for closing chunks.
    pub closing_min_chars_per_sec: f64,
}

impl Default for DurationThresholds {
    fn default() -> Self {
        Self {
            enabled: true,
            min_chars_per_sec: 8.0,
            max_chars_per_sec: 25.0,
            closing_min_chars_per_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchThresholds {
    pub enabled: bool,
    pub max_jump_semitones: f64,
    pub max_range_semitones: f64,
}

impl Default for PitchThresholds {
    fn default() -> Self {
        Self {
            enabled: true,
            max_jump_semitones: defaults::OCTAVE_SEMITONES,
            max_range_semitones: 2.0 * defaults::OCTAVE_SEMITONES,
        }
    }
}

/// Echo fails when both soft limits are exceeded or either hard limit is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoThresholds {
    pub enabled: bool,
    pub cepstral_peak_max: f64,
    pub autocorr_max: f64,
    pub cepstral_peak_hard: f64,
    pub autocorr_hard: f64,
}

impl Default for EchoThresholds {
    fn default() -> Self {
        Self {
            enabled: true,
            cepstral_peak_max: 0.12,
            autocorr_max: 0.35,
            cepstral_peak_hard: 0.25,
            autocorr_hard: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceShiftThresholds {
    pub enabled: bool,
    /// Largest acceptable tail-to-head profile distance, in dB.
    pub max_tonal_distance: f64,
}

impl Default for VoiceShiftThresholds {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tonal_distance: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HissThresholds {
    pub enabled: bool,
    pub max_hf_flatness: f64,
    pub max_noise_floor_db: f64,
}

impl Default for HissThresholds {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hf_flatness: 0.5,
            max_noise_floor_db: -45.0,
        }
    }
}

/// Every gate's thresholds. Immutable once built; sweeps construct new values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub duration: DurationThresholds,
    pub pitch: PitchThresholds,
    pub echo: EchoThresholds,
    pub voice_shift: VoiceShiftThresholds,
    pub hiss: HissThresholds,
}

fn finite(key: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(TakepickError::config(key, "must be a finite number"))
    }
}

fn at_most(key: &str, value: f64, bound_key: &str, bound: f64) -> Result<()> {
    if value <= bound {
        Ok(())
    } else {
        Err(TakepickError::config(
            key,
            format!("{} exceeds {} ({})", value, bound_key, bound),
        ))
    }
}

impl ThresholdConfig {
    /// Reject thresholds that would make a gate meaningless.
    pub fn validate(&self) -> Result<()> {
        let d = &self.duration;
        finite("thresholds.duration.min_chars_per_sec", d.min_chars_per_sec)?;
        finite("thresholds.duration.max_chars_per_sec", d.max_chars_per_sec)?;
        finite(
            "thresholds.duration.closing_min_chars_per_sec",
            d.closing_min_chars_per_sec,
        )?;
        at_most(
            "thresholds.duration.min_chars_per_sec",
            d.min_chars_per_sec,
            "max_chars_per_sec",
            d.max_chars_per_sec,
        )?;
        at_most(
            "thresholds.duration.closing_min_chars_per_sec",
            d.closing_min_chars_per_sec,
            "max_chars_per_sec",
            d.max_chars_per_sec,
        )?;

        finite("thresholds.pitch.max_jump_semitones", self.pitch.max_jump_semitones)?;
        finite("thresholds.pitch.max_range_semitones", self.pitch.max_range_semitones)?;

        let e = &self.echo;
        finite("thresholds.echo.cepstral_peak_max", e.cepstral_peak_max)?;
        finite("thresholds.echo.autocorr_max", e.autocorr_max)?;
        finite("thresholds.echo.cepstral_peak_hard", e.cepstral_peak_hard)?;
        finite("thresholds.echo.autocorr_hard", e.autocorr_hard)?;
        at_most(
            "thresholds.echo.cepstral_peak_max",
            e.cepstral_peak_max,
            "cepstral_peak_hard",
            e.cepstral_peak_hard,
        )?;
        at_most(
            "thresholds.echo.autocorr_max",
            e.autocorr_max,
            "autocorr_hard",
            e.autocorr_hard,
        )?;

        finite(
            "thresholds.voice_shift.max_tonal_distance",
            self.voice_shift.max_tonal_distance,
        )?;
        finite("thresholds.hiss.max_hf_flatness", self.hiss.max_hf_flatness)?;
        finite("thresholds.hiss.max_noise_floor_db", self.hiss.max_noise_floor_db)?;
        Ok(())
    }
}

/// Ordered set of gates built from one threshold configuration.
pub struct GatePipeline {
    gates: Vec<Box<dyn Gate>>,
}

impl GatePipeline {
    /// The five built-in gates in their fixed evaluation order.
    pub fn new(thresholds: &ThresholdConfig) -> Self {
        Self {
            gates: vec![
                Box::new(DurationOutlier::new(thresholds.duration.clone())),
                Box::new(PitchBreakout::new(thresholds.pitch.clone())),
                Box::new(EchoRisk::new(thresholds.echo.clone())),
                Box::new(VoiceShift::new(thresholds.voice_shift.clone())),
                Box::new(HissRisk::new(thresholds.hiss.clone())),
            ],
        }
    }

    pub fn with_gates(gates: Vec<Box<dyn Gate>>) -> Self {
        Self { gates }
    }

    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    /// One result per gate, in pipeline order.
    pub fn evaluate(&self, features: &FeatureVector) -> Vec<GateResult> {
        self.gates
            .iter()
            .map(|gate| evaluate_gate(gate.as_ref(), features))
            .collect()
    }
}

fn evaluate_gate(gate: &dyn Gate, features: &FeatureVector) -> GateResult {
    if !gate.enabled() || !gate.applies(&features.context) {
        return GateResult::skipped(gate.name());
    }

    let mut reasons = Vec::new();
    let mut used = BTreeMap::new();
    for &feature in gate.required() {
        match features.get(feature) {
            Some(v) if v.is_finite() => {
                used.insert(feature, v);
            }
            value => {
                let err = TakepickError::GateEvaluation {
                    gate: gate.name().to_string(),
                    feature: feature.name().to_string(),
                    message: if value.is_some() {
                        "value is not finite".to_string()
                    } else {
                        "feature is missing".to_string()
                    },
                };
                tracing::warn!(error = %err, "treating unevaluable gate as failed");
                let prefix = if value.is_some() { "nan_feature" } else { "missing_feature" };
                reasons.push(format!("{}:{}", prefix, feature));
            }
        }
    }

    if reasons.is_empty() {
        gate.check(features, &mut reasons);
    }

    GateResult {
        gate: gate.name().to_string(),
        passed: reasons.is_empty(),
        skipped: false,
        reasons,
        features: used,
    }
}

/// Evaluate the built-in gates for one vector.
pub fn evaluate(features: &FeatureVector, thresholds: &ThresholdConfig) -> Vec<GateResult> {
    GatePipeline::new(thresholds).evaluate(features)
}

/// Whether a set of gate results lets the candidate through.
pub fn all_passed(results: &[GateResult]) -> bool {
    results.iter().all(|r| r.passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_vector() -> FeatureVector {
        FeatureVector::new(ContextFlags {
            has_previous: true,
            is_opening: false,
            is_closing: false,
        })
        .with(Feature::DurationSecs, 3.0)
        .with(Feature::CharsPerSec, 14.0)
        .with(Feature::PitchRangeSemitones, 8.0)
        .with(Feature::MaxPitchJumpSemitones, 3.0)
        .with(Feature::CentroidJumpRatio, 1.4)
        .with(Feature::CepstralPeak, 0.05)
        .with(Feature::AutocorrEcho, 0.1)
        .with(Feature::HfFlatness, 0.2)
        .with(Feature::NoiseFloorDb, -60.0)
        .with(Feature::TonalDistance, 2.0)
    }

    #[test]
    fn clean_vector_passes_every_gate() {
        let results = evaluate(&clean_vector(), &ThresholdConfig::default());
        assert_eq!(results.len(), 5);
        assert!(all_passed(&results));
        assert!(results.iter().all(|r| !r.skipped && r.reasons.is_empty()));
    }

    #[test]
    fn pipeline_order_is_fixed() {
        let pipeline = GatePipeline::new(&ThresholdConfig::default());
        assert_eq!(
            pipeline.gate_names(),
            vec![
                "duration_outlier",
                "pitch_breakout",
                "echo_risk",
                "voice_shift",
                "hiss_risk"
            ]
        );
    }

    #[test]
    fn every_failing_gate_is_recorded() {
        let fv = clean_vector()
            .with(Feature::MaxPitchJumpSemitones, 14.0)
            .with(Feature::HfFlatness, 0.9);
        let results = evaluate(&fv, &ThresholdConfig::default());

        let failed: Vec<&str> = results
            .iter()
            .filter(|r| r.failed())
            .map(|r| r.gate.as_str())
            .collect();
        assert_eq!(failed, vec!["pitch_breakout", "hiss_risk"]);
        for r in results.iter().filter(|r| r.failed()) {
            assert!(!r.reasons.is_empty());
        }
    }

    #[test]
    fn missing_and_nan_features_fail_with_distinct_reasons() {
        let mut fv = clean_vector().with(Feature::HfFlatness, f64::NAN);
        fv.values.remove(&Feature::CharsPerSec);
        let results = evaluate(&fv, &ThresholdConfig::default());

        let duration = &results[0];
        assert!(duration.failed());
        assert_eq!(duration.reasons, vec!["missing_feature:chars_per_sec"]);

        let hiss = &results[4];
        assert!(hiss.failed());
        assert_eq!(hiss.reasons, vec!["nan_feature:hf_flatness"]);
        assert_eq!(hiss.features.get(&Feature::NoiseFloorDb), Some(&-60.0));
    }

    #[test]
    fn voice_shift_skipped_without_previous_selection() {
        let mut fv = clean_vector().with(Feature::TonalDistance, 50.0);
        fv.context.has_previous = false;
        let results = evaluate(&fv, &ThresholdConfig::default());

        let vs = results.iter().find(|r| r.gate == "voice_shift").unwrap();
        assert!(vs.skipped);
        assert!(vs.passed);
        assert!(all_passed(&results));
    }

    #[test]
    fn voice_shift_without_distance_but_with_context_fails() {
        let mut fv = clean_vector();
        fv.values.remove(&Feature::TonalDistance);
        let results = evaluate(&fv, &ThresholdConfig::default());
        let vs = results.iter().find(|r| r.gate == "voice_shift").unwrap();
        assert_eq!(vs.reasons, vec!["missing_feature:tonal_distance"]);
    }

    #[test]
    fn disabled_gate_is_skipped() {
        let mut thresholds = ThresholdConfig::default();
        thresholds.hiss.enabled = false;
        let fv = clean_vector().with(Feature::HfFlatness, 0.99);
        let results = evaluate(&fv, &thresholds);
        assert!(results[4].skipped);
        assert!(all_passed(&results));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let fv = clean_vector().with(Feature::CepstralPeak, 0.3);
        let thresholds = ThresholdConfig::default();
        let first = evaluate(&fv, &thresholds);
        for _ in 0..10 {
            assert_eq!(evaluate(&fv, &thresholds), first);
        }
    }

    /// Tightening any single threshold never lets a failed vector pass.
    #[test]
    fn tightening_thresholds_is_monotone() {
        let base = ThresholdConfig::default();
        let tightenings: Vec<Box<dyn Fn(&mut ThresholdConfig, f64)>> = vec![
            Box::new(|t, s| t.duration.min_chars_per_sec += s),
            Box::new(|t, s| t.duration.max_chars_per_sec -= s),
            Box::new(|t, s| t.duration.closing_min_chars_per_sec += s),
            Box::new(|t, s| t.pitch.max_jump_semitones -= s),
            Box::new(|t, s| t.pitch.max_range_semitones -= s),
            Box::new(|t, s| t.echo.cepstral_peak_max -= s / 50.0),
            Box::new(|t, s| t.echo.autocorr_max -= s / 50.0),
            Box::new(|t, s| t.echo.cepstral_peak_hard -= s / 50.0),
            Box::new(|t, s| t.echo.autocorr_hard -= s / 50.0),
            Box::new(|t, s| t.voice_shift.max_tonal_distance -= s),
            Box::new(|t, s| t.hiss.max_hf_flatness -= s / 20.0),
            Box::new(|t, s| t.hiss.max_noise_floor_db -= s),
        ];

        // A spread of vectors around the default limits
        let mut vectors = Vec::new();
        for i in 0..8 {
            let x = i as f64 / 7.0;
            let mut fv = clean_vector()
                .with(Feature::CharsPerSec, 5.0 + 25.0 * x)
                .with(Feature::MaxPitchJumpSemitones, 9.0 + 6.0 * x)
                .with(Feature::PitchRangeSemitones, 20.0 + 8.0 * (1.0 - x))
                .with(Feature::CepstralPeak, 0.05 + 0.25 * x)
                .with(Feature::AutocorrEcho, 0.7 * (1.0 - x))
                .with(Feature::TonalDistance, 3.0 + 5.0 * x)
                .with(Feature::HfFlatness, 0.3 + 0.3 * x)
                .with(Feature::NoiseFloorDb, -55.0 + 15.0 * x);
            fv.context.is_closing = i % 2 == 0;
            vectors.push(fv);
        }

        for tighten in &tightenings {
            for step in [0.5, 1.0, 3.0] {
                let mut tighter = base.clone();
                tighten(&mut tighter, step);
                for fv in &vectors {
                    let loose_pass = all_passed(&evaluate(fv, &base));
                    let tight_pass = all_passed(&evaluate(fv, &tighter));
                    assert!(
                        loose_pass || !tight_pass,
                        "tightening let a failed vector through"
                    );
                }
            }
        }
    }

    #[test]
    fn extraction_failure_result_has_reason() {
        let r = GateResult::extraction_failed("too short");
        assert_eq!(r.gate, EXTRACTION_GATE);
        assert!(r.failed());
        assert_eq!(r.reasons, vec!["extraction_failed"]);
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let mut t = ThresholdConfig::default();
        assert!(t.validate().is_ok());

        t.duration.min_chars_per_sec = 30.0;
        assert!(matches!(
            t.validate(),
            Err(TakepickError::Configuration { key, .. }) if key == "thresholds.duration.min_chars_per_sec"
        ));

        let mut t = ThresholdConfig::default();
        t.hiss.max_hf_flatness = f64::NAN;
        assert!(t.validate().is_err());
    }

    #[test]
    fn thresholds_parse_from_partial_toml() {
        let t: ThresholdConfig = toml::from_str(
            r#"
            [echo]
            autocorr_max = 0.4

            [voice_shift]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(t.echo.autocorr_max, 0.4);
        assert_eq!(t.echo.cepstral_peak_max, 0.12);
        assert!(!t.voice_shift.enabled);
        assert_eq!(t.pitch, PitchThresholds::default());
    }
}
