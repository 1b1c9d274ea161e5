//! Per-chunk state machine: PENDING → GATING → RANKING → SELECTED | EXHAUSTED | BLOCKED.

use super::types::{
    CandidateEvaluation, ChunkState, EliminationRecord, LowConfidencePolicy, SelectionLogEntry,
};
use crate::error::{Result, TakepickError};
use crate::features::FeatureVector;
use crate::gates::{GatePipeline, GateResult};
use crate::model::{Candidate, Chunk};
use crate::rank::{self, Confidence, ConfidenceCutoffs, WeightConfig};
use std::collections::BTreeMap;

/// Turn evaluated candidates into a log entry. Pure; the sweep calls this
/// directly with stored evaluations.
pub fn decide(
    chunk_index: u32,
    evaluations: &[CandidateEvaluation],
    weights: &WeightConfig,
    cutoffs: &ConfidenceCutoffs,
    policy: LowConfidencePolicy,
) -> SelectionLogEntry {
    let mut eliminated = Vec::new();
    let mut survivors = Vec::new();
    for evaluation in evaluations {
        match &evaluation.features {
            Some(features) if evaluation.passed() => {
                survivors.push((evaluation.candidate.clone(), features.clone()));
            }
            _ => eliminated.push(EliminationRecord {
                candidate: evaluation.candidate.clone(),
                failed: evaluation
                    .gates
                    .iter()
                    .filter(|g| g.failed())
                    .cloned()
                    .collect(),
            }),
        }
    }

    let remaining = rank::rank(&survivors, weights);
    let margin = rank::margin(&remaining);

    let (state, selected, confidence) = match remaining.first() {
        None => (ChunkState::Exhausted, None, Confidence::Low),
        Some(top) => {
            let confidence = cutoffs.classify(margin);
            if confidence == Confidence::Low && policy == LowConfidencePolicy::Block {
                (ChunkState::Blocked, None, confidence)
            } else {
                (ChunkState::Selected, Some(top.clone()), confidence)
            }
        }
    };

    SelectionLogEntry {
        chunk_index,
        state,
        total_candidates: evaluations.len(),
        eliminated,
        remaining,
        needs_human_review: selected.is_none() || confidence == Confidence::Low,
        selected,
        confidence,
        margin,
        topup_rounds: 0,
    }
}

/// Drives one chunk's decision across top-up rounds.
///
/// Gate results are kept per candidate version so a pool enlarged by top-up
/// only evaluates the new arrivals.
#[derive(Debug, Clone)]
pub struct ChunkSelector {
    chunk: Chunk,
    state: ChunkState,
    pool: Vec<Candidate>,
    evaluations: BTreeMap<u32, CandidateEvaluation>,
    topup_rounds: u32,
}

impl ChunkSelector {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            state: ChunkState::Pending,
            pool: Vec::new(),
            evaluations: BTreeMap::new(),
            topup_rounds: 0,
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn pool(&self) -> &[Candidate] {
        &self.pool
    }

    pub fn topup_rounds(&self) -> u32 {
        self.topup_rounds
    }

    fn invalid(&self, action: &str) -> TakepickError {
        TakepickError::InvalidTransition {
            chunk_index: self.chunk.index,
            state: self.state.to_string(),
            action: action.to_string(),
        }
    }

    /// Add candidates to the pool. New arrivals move the chunk into GATING.
    ///
    /// Candidates for another chunk or with an already-seen version are
    /// ignored. Returns how many were added.
    pub fn admit(&mut self, candidates: Vec<Candidate>) -> Result<usize> {
        if !matches!(
            self.state,
            ChunkState::Pending | ChunkState::Gating | ChunkState::Exhausted
        ) {
            return Err(self.invalid("admit candidates"));
        }

        let mut added = 0;
        for candidate in candidates {
            if candidate.chunk_index != self.chunk.index {
                tracing::warn!(
                    chunk = self.chunk.index,
                    candidate = %candidate.id(),
                    "ignoring candidate for another chunk"
                );
                continue;
            }
            if self.pool.iter().any(|c| c.version == candidate.version) {
                tracing::warn!(candidate = %candidate.id(), "ignoring duplicate candidate version");
                continue;
            }
            self.pool.push(candidate);
            added += 1;
        }

        if added > 0 && self.state != ChunkState::Gating {
            tracing::debug!(chunk = self.chunk.index, from = %self.state, "entering GATING");
            self.state = ChunkState::Gating;
        }
        Ok(added)
    }

    /// Count one top-up round against this chunk.
    pub fn note_topup(&mut self) {
        self.topup_rounds += 1;
    }

    /// Pool members without a gate result yet.
    pub fn unevaluated(&self) -> Vec<Candidate> {
        self.pool
            .iter()
            .filter(|c| !self.evaluations.contains_key(&c.version))
            .cloned()
            .collect()
    }

    /// Gate one candidate from its extraction outcome. Failed extraction
    /// eliminates the candidate; it never aborts the chunk.
    pub fn record(
        &mut self,
        version: u32,
        extraction: Result<FeatureVector>,
        pipeline: &GatePipeline,
    ) -> Result<()> {
        if self.state != ChunkState::Gating {
            return Err(self.invalid("record gate results"));
        }
        let Some(candidate) = self.pool.iter().find(|c| c.version == version).cloned() else {
            return Err(self.invalid(&format!("record unknown version {}", version)));
        };

        let evaluation = match extraction {
            Ok(features) => CandidateEvaluation {
                gates: pipeline.evaluate(&features),
                features: Some(features),
                candidate,
            },
            Err(e) => {
                tracing::warn!(candidate = %candidate.id(), error = %e, "extraction failed");
                CandidateEvaluation {
                    gates: vec![GateResult::extraction_failed(&e.to_string())],
                    features: None,
                    candidate,
                }
            }
        };
        self.evaluations.insert(version, evaluation);
        Ok(())
    }

    /// Evaluations recorded so far, by version.
    pub fn evaluations(&self) -> impl Iterator<Item = &CandidateEvaluation> {
        self.evaluations.values()
    }

    /// Rank the gated pool and settle the chunk.
    ///
    /// Requires every pool member to have been gated.
    pub fn decide(
        &mut self,
        weights: &WeightConfig,
        cutoffs: &ConfidenceCutoffs,
        policy: LowConfidencePolicy,
    ) -> Result<SelectionLogEntry> {
        if self.state != ChunkState::Gating {
            return Err(self.invalid("rank"));
        }
        let outstanding = self.unevaluated().len();
        if outstanding > 0 {
            return Err(self.invalid(&format!("rank with {} candidates ungated", outstanding)));
        }

        self.state = ChunkState::Ranking;
        let evaluations: Vec<CandidateEvaluation> = self.evaluations.values().cloned().collect();
        let mut entry = decide(self.chunk.index, &evaluations, weights, cutoffs, policy);
        entry.topup_rounds = self.topup_rounds;
        self.state = entry.state;

        tracing::info!(
            chunk = self.chunk.index,
            state = %entry.state,
            total = entry.total_candidates,
            eliminated = entry.eliminated.len(),
            selected = ?entry.selected_version(),
            confidence = %entry.confidence,
            "chunk decided"
        );
        Ok(entry)
    }
}
