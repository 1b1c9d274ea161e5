//! Weight sweeps across several judged sessions.
//!
//! Gate results do not depend on weights, so every session is gated once
//! from its cached features and only the ranker reruns per grid point.
//! Configurations are ordered by their leave-one-session-out minimum exact
//! rate, so a single session that happens to love one setting cannot carry
//! it to the top.

use crate::error::{Result, TakepickError};
use crate::features::FeatureCache;
use crate::gates::{GatePipeline, GateResult};
use crate::rank::{ConfidenceCutoffs, WeightConfig};
use crate::selection::{self, CandidateEvaluation, LowConfidencePolicy, SelectionLogEntry};
use crate::session::{HumanPicks, SessionStore};
use crate::validation::harness::{self, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Values to try per weight. An empty axis keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightGrid {
    pub quality: Vec<f64>,
    pub echo: Vec<f64>,
    pub tonal: Vec<f64>,
    pub hiss: Vec<f64>,
    pub duration: Vec<f64>,
}

impl WeightGrid {
    fn axis(values: &[f64], base: f64) -> Vec<f64> {
        if values.is_empty() {
            vec![base]
        } else {
            values.to_vec()
        }
    }

    /// Cartesian product over every axis, in axis order.
    pub fn combinations(&self, base: &WeightConfig) -> Vec<WeightConfig> {
        let mut out = Vec::new();
        for &quality in &Self::axis(&self.quality, base.quality) {
            for &echo in &Self::axis(&self.echo, base.echo) {
                for &tonal in &Self::axis(&self.tonal, base.tonal) {
                    for &hiss in &Self::axis(&self.hiss, base.hiss) {
                        for &duration in &Self::axis(&self.duration, base.duration) {
                            out.push(WeightConfig {
                                quality,
                                echo,
                                tonal,
                                hiss,
                                duration,
                                ..base.clone()
                            });
                        }
                    }
                }
            }
        }
        out
    }

    /// Every combination must be a valid weight configuration.
    pub fn validate(&self, base: &WeightConfig) -> Result<Vec<WeightConfig>> {
        let combinations = self.combinations(base);
        for weights in &combinations {
            weights.validate()?;
        }
        Ok(combinations)
    }
}

/// Gated pool of one judged session, ready for re-ranking.
#[derive(Debug, Clone)]
pub struct GatedSession {
    pub session: String,
    pub chunks: Vec<(u32, Vec<CandidateEvaluation>)>,
    pub picks: HumanPicks,
}

impl GatedSession {
    /// Gate every pool member of `session` from the persisted feature cache.
    ///
    /// Candidates without cached features count as extraction failures;
    /// run `select` first so the cache is populated.
    pub fn load(store: &SessionStore, session: &str, pipeline: &GatePipeline) -> Result<Self> {
        let spec = store.load_session(session)?;
        let picks = store
            .load_human_picks(session)?
            .ok_or_else(|| TakepickError::Store {
                message: format!("session {} has no human_picks.json", session),
            })?;
        let cache = FeatureCache::load(&store.features_path(session))?;

        let mut pools: BTreeMap<u32, Vec<CandidateEvaluation>> =
            spec.chunks.iter().map(|c| (c.index, Vec::new())).collect();
        for candidate in store.load_pool(session, &spec)? {
            let Some(pool) = pools.get_mut(&candidate.chunk_index) else {
                continue;
            };
            let features = cache.latest(candidate.id()).cloned();
            let gates = match &features {
                Some(fv) => pipeline.evaluate(fv),
                None => {
                    tracing::debug!(candidate = %candidate.id(), "no cached features");
                    vec![GateResult::extraction_failed("no cached features")]
                }
            };
            pool.push(CandidateEvaluation {
                candidate,
                features,
                gates,
            });
        }

        Ok(Self {
            session: session.to_string(),
            chunks: pools.into_iter().collect(),
            picks,
        })
    }

    /// Re-rank every chunk under `weights` and score against the picks.
    pub fn score(
        &self,
        weights: &WeightConfig,
        cutoffs: &ConfidenceCutoffs,
        policy: LowConfidencePolicy,
    ) -> ValidationResult {
        let entries: Vec<SelectionLogEntry> = self
            .chunks
            .iter()
            .map(|(index, evaluations)| selection::decide(*index, evaluations, weights, cutoffs, policy))
            .collect();
        harness::validate_entries(&self.session, &entries, &self.picks)
    }
}

/// Outcome of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub weights: WeightConfig,
    pub sessions: Vec<ValidationResult>,
    pub macro_exact_pct: f64,
    pub macro_top3_pct: f64,
    pub worst_session: String,
    pub worst_exact_pct: f64,
    /// Lowest macro exact rate over the sessions left after dropping any one.
    pub loo_min_exact_pct: f64,
}

impl SweepRow {
    fn new(weights: WeightConfig, sessions: Vec<ValidationResult>) -> Self {
        let n = sessions.len() as f64;
        let exact_sum: f64 = sessions.iter().map(|s| s.exact_pct).sum();
        let top3_sum: f64 = sessions.iter().map(|s| s.top3_pct).sum();

        let worst = sessions
            .iter()
            .min_by(|a, b| a.exact_pct.total_cmp(&b.exact_pct));
        let loo_min_exact_pct = sessions
            .iter()
            .map(|left_out| (exact_sum - left_out.exact_pct) / (n - 1.0))
            .fold(f64::INFINITY, f64::min);

        Self {
            macro_exact_pct: exact_sum / n,
            macro_top3_pct: top3_sum / n,
            worst_session: worst.map(|w| w.session.clone()).unwrap_or_default(),
            worst_exact_pct: worst.map(|w| w.exact_pct).unwrap_or(0.0),
            loo_min_exact_pct,
            weights,
            sessions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Best first.
    pub rows: Vec<SweepRow>,
}

impl SweepReport {
    pub fn best(&self) -> Option<&SweepRow> {
        self.rows.first()
    }
}

/// Score every grid combination across `sessions`.
pub fn sweep(
    sessions: &[GatedSession],
    grid: &WeightGrid,
    base: &WeightConfig,
    cutoffs: &ConfidenceCutoffs,
    policy: LowConfidencePolicy,
) -> Result<SweepReport> {
    if sessions.len() < 2 {
        return Err(TakepickError::config(
            "sweep.sessions",
            format!(
                "needs at least 2 judged sessions, got {}; a single session overfits",
                sessions.len()
            ),
        ));
    }
    let combinations = grid.validate(base)?;
    tracing::info!(
        sessions = sessions.len(),
        combinations = combinations.len(),
        "starting weight sweep"
    );

    let mut rows: Vec<SweepRow> = combinations
        .into_iter()
        .map(|weights| {
            let results = sessions
                .iter()
                .map(|s| s.score(&weights, cutoffs, policy))
                .collect();
            SweepRow::new(weights, results)
        })
        .collect();

    // Stable sort keeps grid order among equals
    rows.sort_by(|a, b| {
        b.loo_min_exact_pct
            .total_cmp(&a.loo_min_exact_pct)
            .then_with(|| b.macro_exact_pct.total_cmp(&a.macro_exact_pct))
            .then_with(|| b.macro_top3_pct.total_cmp(&a.macro_top3_pct))
    });
    Ok(SweepReport { rows })
}
