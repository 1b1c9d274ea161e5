//! Chunk selection: state machine, decisions and the per-run audit log.

pub mod log;
pub mod selector;
pub mod types;

pub use log::{RunLog, read_log};
pub use selector::{ChunkSelector, decide};
pub use types::{
    CandidateEvaluation, ChunkState, EliminationRecord, LowConfidencePolicy, SelectionLogEntry,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub low_confidence_policy: LowConfidencePolicy,
    /// Synthesis quality score below which a candidate counts as sub-par in
    /// the manifest summary. Informational only; gating ignores it.
    pub prefilter_quality_bar: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            low_confidence_policy: LowConfidencePolicy::AutoSelect,
            prefilter_quality_bar: 0.5,
        }
    }
}
