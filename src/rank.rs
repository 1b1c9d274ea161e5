//! Weighted-sum ranking of gate survivors and margin-based confidence.

use crate::defaults;
use crate::error::{Result, TakepickError};
use crate::features::{Feature, FeatureVector};
use crate::model::Candidate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Cepstral peak treated as maximal echo risk when normalizing.
const CEPSTRAL_NORM: f64 = 0.25;

/// Term value used when the features a term needs are unavailable.
const NEUTRAL_TERM: f64 = 0.5;

/// Ranker weights. Each term lies in `[0, 1]`; the score is their weighted mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub quality: f64,
    pub echo: f64,
    pub tonal: f64,
    pub hiss: f64,
    pub duration: f64,
    /// Speaking rate the duration term prefers.
    pub target_chars_per_sec: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            quality: 100.0,
            echo: 300.0,
            tonal: 150.0,
            hiss: 100.0,
            duration: 20.0,
            target_chars_per_sec: defaults::TARGET_CHARS_PER_SEC,
        }
    }
}

impl WeightConfig {
    /// Weights in term order, paired with their names.
    pub fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("quality", self.quality),
            ("echo", self.echo),
            ("tonal", self.tonal),
            ("hiss", self.hiss),
            ("duration", self.duration),
        ]
    }

    fn total(&self) -> f64 {
        self.named().iter().map(|(_, w)| w).sum()
    }

    /// Weights must be finite, non-negative and not all zero.
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in self.named() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(TakepickError::config(
                    format!("weights.{}", name),
                    format!("must be a non-negative number, got {}", weight),
                ));
            }
        }
        if self.total() <= 0.0 {
            return Err(TakepickError::config("weights", "at least one weight must be positive"));
        }
        if !self.target_chars_per_sec.is_finite() || self.target_chars_per_sec <= 0.0 {
            return Err(TakepickError::config(
                "weights.target_chars_per_sec",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        })
    }
}

/// Score margins separating the confidence levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceCutoffs {
    pub high_margin: f64,
    pub medium_margin: f64,
}

impl Default for ConfidenceCutoffs {
    fn default() -> Self {
        Self {
            high_margin: 0.05,
            medium_margin: 0.02,
        }
    }
}

impl ConfidenceCutoffs {
    pub fn validate(&self) -> Result<()> {
        if !self.medium_margin.is_finite() || self.medium_margin < 0.0 {
            return Err(TakepickError::config(
                "confidence.medium_margin",
                "must be a non-negative number",
            ));
        }
        if !self.high_margin.is_finite() || self.high_margin < self.medium_margin {
            return Err(TakepickError::config(
                "confidence.high_margin",
                "must be a number no smaller than medium_margin",
            ));
        }
        Ok(())
    }

    /// Label for a top-two margin; `None` means a single survivor.
    pub fn classify(&self, margin: Option<f64>) -> Confidence {
        match margin {
            None => Confidence::High,
            Some(m) if m >= self.high_margin => Confidence::High,
            Some(m) if m >= self.medium_margin => Confidence::Medium,
            Some(_) => Confidence::Low,
        }
    }
}

/// A gate survivor with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub rank_score: f64,
    /// Weighted share of each term; sums to `rank_score`.
    pub contributions: BTreeMap<String, f64>,
}

impl RankedCandidate {
    pub fn version(&self) -> u32 {
        self.candidate.version
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Normalized term values for one candidate, in [`WeightConfig::named`] order.
pub fn terms(candidate: &Candidate, features: &FeatureVector, weights: &WeightConfig) -> [f64; 5] {
    let quality = if candidate.quality_score.is_finite() {
        clamp01(candidate.quality_score)
    } else {
        0.0
    };

    let echo = match (
        features.finite(Feature::CepstralPeak),
        features.finite(Feature::AutocorrEcho),
    ) {
        (Some(c), Some(a)) => 1.0 - (clamp01(c / CEPSTRAL_NORM) + clamp01(a)) / 2.0,
        _ => NEUTRAL_TERM,
    };

    // No previous selection means nothing to be discontinuous with
    let tonal = features
        .finite(Feature::TonalDistance)
        .map(|d| 1.0 / (1.0 + d.max(0.0)))
        .unwrap_or(1.0);

    let hiss = features
        .finite(Feature::HfFlatness)
        .map(|f| 1.0 - clamp01(f))
        .unwrap_or(NEUTRAL_TERM);

    let target = weights.target_chars_per_sec;
    let duration = features
        .finite(Feature::CharsPerSec)
        .map(|r| 1.0 - clamp01((r - target).abs() / target))
        .unwrap_or(NEUTRAL_TERM);

    [quality, echo, tonal, hiss, duration]
}

/// Score one candidate.
pub fn score(
    candidate: &Candidate,
    features: &FeatureVector,
    weights: &WeightConfig,
) -> (f64, BTreeMap<String, f64>) {
    let total = weights.total();
    let mut contributions = BTreeMap::new();
    if total <= 0.0 {
        return (0.0, contributions);
    }

    let values = terms(candidate, features, weights);
    let mut sum = 0.0;
    for ((name, weight), value) in weights.named().into_iter().zip(values) {
        let share = weight * value / total;
        contributions.insert(name.to_string(), share);
        sum += share;
    }
    (sum, contributions)
}

/// Best-first ordering: higher score, then lower version.
pub fn compare(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.rank_score
        .total_cmp(&a.rank_score)
        .then_with(|| a.candidate.version.cmp(&b.candidate.version))
}

/// Score and order survivors. Inputs are not modified.
pub fn rank(survivors: &[(Candidate, FeatureVector)], weights: &WeightConfig) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = survivors
        .iter()
        .map(|(candidate, features)| {
            let (rank_score, contributions) = score(candidate, features, weights);
            RankedCandidate {
                candidate: candidate.clone(),
                rank_score,
                contributions,
            }
        })
        .collect();
    ranked.sort_by(compare);
    ranked
}

/// Margin between the top two scores; `None` with fewer than two.
pub fn margin(ranked: &[RankedCandidate]) -> Option<f64> {
    match ranked {
        [first, second, ..] => Some(first.rank_score - second.rank_score),
        _ => None,
    }
}
