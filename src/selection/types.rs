use crate::features::FeatureVector;
use crate::gates::GateResult;
use crate::model::Candidate;
use crate::rank::{Confidence, RankedCandidate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-chunk lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkState {
    Pending,
    Gating,
    Ranking,
    Selected,
    Exhausted,
    /// Survivors exist but the top margin was too small and policy forbids auto-selection.
    Blocked,
}

impl ChunkState {
    /// Whether a later run may keep this chunk's decision as-is.
    pub fn is_settled(&self) -> bool {
        matches!(self, ChunkState::Selected | ChunkState::Blocked)
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChunkState::Pending => "PENDING",
            ChunkState::Gating => "GATING",
            ChunkState::Ranking => "RANKING",
            ChunkState::Selected => "SELECTED",
            ChunkState::Exhausted => "EXHAUSTED",
            ChunkState::Blocked => "BLOCKED",
        })
    }
}

/// What to do with a non-empty pool whose top margin is classified `low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidencePolicy {
    /// Select the top candidate and flag it for review.
    #[default]
    AutoSelect,
    /// Select nothing; the chunk waits for a human.
    Block,
}

impl FromStr for LowConfidencePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "auto_select" | "auto" => Ok(LowConfidencePolicy::AutoSelect),
            "block" => Ok(LowConfidencePolicy::Block),
            other => Err(format!(
                "unknown low-confidence policy '{}' (expected auto_select or block)",
                other
            )),
        }
    }
}

/// Candidate plus everything computed for it before ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvaluation {
    pub candidate: Candidate,
    /// `None` when extraction failed.
    pub features: Option<FeatureVector>,
    pub gates: Vec<GateResult>,
}

impl CandidateEvaluation {
    pub fn passed(&self) -> bool {
        self.features.is_some() && self.gates.iter().all(|g| g.passed)
    }
}

/// A candidate together with the gates that failed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EliminationRecord {
    pub candidate: Candidate,
    pub failed: Vec<GateResult>,
}

impl EliminationRecord {
    /// Every reason code across the failing gates, qualified by gate name.
    pub fn reason_codes(&self) -> Vec<String> {
        self.failed
            .iter()
            .flat_map(|g| g.reasons.iter().map(move |r| format!("{}:{}", g.gate, r)))
            .collect()
    }
}

/// One chunk's decision in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionLogEntry {
    pub chunk_index: u32,
    pub state: ChunkState,
    pub total_candidates: usize,
    pub eliminated: Vec<EliminationRecord>,
    /// Survivors, best first.
    pub remaining: Vec<RankedCandidate>,
    pub selected: Option<RankedCandidate>,
    pub confidence: Confidence,
    pub needs_human_review: bool,
    /// Score gap between the top two survivors; absent with fewer than two.
    pub margin: Option<f64>,
    /// Top-up rounds spent on this chunk before this decision.
    #[serde(default)]
    pub topup_rounds: u32,
}

impl SelectionLogEntry {
    pub fn selected_version(&self) -> Option<u32> {
        self.selected.as_ref().map(|s| s.candidate.version)
    }

    /// Versions of the first `k` ranked survivors.
    pub fn top_versions(&self, k: usize) -> Vec<u32> {
        self.remaining.iter().take(k).map(|r| r.version()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&ChunkState::Exhausted).unwrap(),
            "\"EXHAUSTED\""
        );
        assert_eq!(ChunkState::Selected.to_string(), "SELECTED");
        assert!(ChunkState::Blocked.is_settled());
        assert!(!ChunkState::Exhausted.is_settled());
    }

    #[test]
    fn policy_parses_common_spellings() {
        assert_eq!(
            "auto-select".parse::<LowConfidencePolicy>().unwrap(),
            LowConfidencePolicy::AutoSelect
        );
        assert_eq!(
            "BLOCK".parse::<LowConfidencePolicy>().unwrap(),
            LowConfidencePolicy::Block
        );
        assert!("maybe".parse::<LowConfidencePolicy>().is_err());
    }

    #[test]
    fn elimination_reason_codes_are_qualified() {
        let record = EliminationRecord {
            candidate: Candidate::new(0, 1, "a.wav"),
            failed: vec![GateResult {
                gate: "echo_risk".to_string(),
                passed: false,
                skipped: false,
                reasons: vec!["echo_combined".to_string(), "echo_autocorr_severe".to_string()],
                features: Default::default(),
            }],
        };
        assert_eq!(
            record.reason_codes(),
            vec!["echo_risk:echo_combined", "echo_risk:echo_autocorr_severe"]
        );
    }
}
