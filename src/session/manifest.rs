//! Session-level aggregate of selection decisions.

use crate::selection::{ChunkState, SelectionLogEntry};
use serde::{Deserialize, Serialize};

/// Per-candidate cost figures used for the manifest estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub per_candidate_usd: f64,
    pub per_candidate_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub chunk_count: usize,
    pub total_candidates: usize,
    /// Candidates whose synthesis quality score fell below the pre-filter bar.
    pub below_prefilter: usize,
    pub estimated_cost_usd: f64,
    pub estimated_synthesis_secs: f64,
    /// Selected with confidence high or medium.
    pub resolved: usize,
    /// Selected but flagged for human review.
    pub flagged: usize,
    pub exhausted: usize,
    pub blocked: usize,
    /// Chunks with no decision (run cancelled before reaching them).
    pub undecided: usize,
}

/// Chunk-level failure surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub chunk_index: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session: String,
    pub summary: ManifestSummary,
    pub entries: Vec<SelectionLogEntry>,
    #[serde(default)]
    pub failures: Vec<ChunkFailure>,
}

impl SessionManifest {
    pub fn build(
        session: &str,
        chunk_count: usize,
        entries: Vec<SelectionLogEntry>,
        failures: Vec<ChunkFailure>,
        below_prefilter: usize,
        cost: &CostConfig,
    ) -> Self {
        let total_candidates: usize = entries.iter().map(|e| e.total_candidates).sum();
        let count = |pred: &dyn Fn(&SelectionLogEntry) -> bool| entries.iter().filter(|e| pred(e)).count();

        let summary = ManifestSummary {
            chunk_count,
            total_candidates,
            below_prefilter,
            estimated_cost_usd: total_candidates as f64 * cost.per_candidate_usd,
            estimated_synthesis_secs: total_candidates as f64 * cost.per_candidate_secs,
            resolved: count(&|e| e.state == ChunkState::Selected && !e.needs_human_review),
            flagged: count(&|e| e.state == ChunkState::Selected && e.needs_human_review),
            exhausted: count(&|e| e.state == ChunkState::Exhausted),
            blocked: count(&|e| e.state == ChunkState::Blocked),
            undecided: chunk_count.saturating_sub(entries.len()),
        };

        Self {
            session: session.to_string(),
            summary,
            entries,
            failures,
        }
    }

    /// Every chunk has a selected candidate.
    pub fn is_fully_resolved(&self) -> bool {
        self.entries.len() == self.summary.chunk_count
            && self.entries.iter().all(|e| e.state == ChunkState::Selected)
    }

    pub fn has_exhausted(&self) -> bool {
        self.summary.exhausted > 0
    }

    pub fn entry(&self, chunk_index: u32) -> Option<&SelectionLogEntry> {
        self.entries.iter().find(|e| e.chunk_index == chunk_index)
    }
}
