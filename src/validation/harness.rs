//! Compare automatic selections with human verdicts.

use crate::defaults::VALIDATION_TOP_K;
use crate::error::Result;
use crate::persist;
use crate::selection::SelectionLogEntry;
use crate::session::{HumanPicks, SessionManifest};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File under the session directory holding the latest result.
pub const VALIDATION_FILE: &str = "validation.json";

/// One judged chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkVerdict {
    pub chunk_index: u32,
    pub human: u32,
    pub selected: Option<u32>,
    pub exact: bool,
    pub in_top3: bool,
}

/// Change against a previous result, in percentage points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationDelta {
    pub exact_pct: f64,
    pub top3_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub session: String,
    /// Chunks with a human pick.
    pub judged: usize,
    pub exact: usize,
    pub exact_pct: f64,
    pub top3: usize,
    pub top3_pct: f64,
    #[serde(default)]
    pub chunks: Vec<ChunkVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ValidationDelta>,
}

fn pct(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// Score a manifest against human picks.
///
/// Only chunks with a pick are judged. A picked chunk missing from the
/// manifest counts as judged and missed.
pub fn validate(manifest: &SessionManifest, picks: &HumanPicks) -> ValidationResult {
    validate_entries(&manifest.session, &manifest.entries, picks)
}

pub(crate) fn validate_entries(
    session: &str,
    entries: &[SelectionLogEntry],
    picks: &HumanPicks,
) -> ValidationResult {
    let chunks: Vec<ChunkVerdict> = picks
        .iter()
        .map(|(&chunk_index, &human)| {
            let entry = entries.iter().find(|e| e.chunk_index == chunk_index);
            let selected = entry.and_then(|e| e.selected_version());
            let exact = selected == Some(human);
            let in_top3 = exact
                || entry.is_some_and(|e| e.top_versions(VALIDATION_TOP_K).contains(&human));
            ChunkVerdict {
                chunk_index,
                human,
                selected,
                exact,
                in_top3,
            }
        })
        .collect();

    let judged = chunks.len();
    let exact = chunks.iter().filter(|c| c.exact).count();
    let top3 = chunks.iter().filter(|c| c.in_top3).count();
    ValidationResult {
        session: session.to_string(),
        judged,
        exact,
        exact_pct: pct(exact, judged),
        top3,
        top3_pct: pct(top3, judged),
        chunks,
        delta: None,
    }
}

impl ValidationResult {
    /// Attach the change relative to `previous`.
    pub fn compared_to(mut self, previous: &ValidationResult) -> Self {
        self.delta = Some(ValidationDelta {
            exact_pct: self.exact_pct - previous.exact_pct,
            top3_pct: self.top3_pct - previous.top3_pct,
        });
        self
    }

    /// Judged chunks where the automatic choice differs from the human's.
    pub fn misses(&self) -> impl Iterator<Item = &ChunkVerdict> {
        self.chunks.iter().filter(|c| !c.exact)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        persist::read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_json(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Candidate;
    use crate::rank::{Confidence, RankedCandidate};
    use crate::selection::ChunkState;
    use crate::session::CostConfig;

    fn ranked(chunk: u32, version: u32, score: f64) -> RankedCandidate {
        RankedCandidate {
            candidate: Candidate::new(chunk, version, "x.wav"),
            rank_score: score,
            contributions: Default::default(),
        }
    }

    /// Entry whose remaining list holds `order`, best first.
    fn entry(chunk: u32, order: &[u32], state: ChunkState) -> SelectionLogEntry {
        let remaining: Vec<RankedCandidate> = order
            .iter()
            .enumerate()
            .map(|(i, &v)| ranked(chunk, v, 1.0 - i as f64 * 0.1))
            .collect();
        SelectionLogEntry {
            chunk_index: chunk,
            state,
            total_candidates: remaining.len(),
            eliminated: Vec::new(),
            selected: (state == ChunkState::Selected).then(|| remaining[0].clone()),
            remaining,
            confidence: Confidence::High,
            needs_human_review: state != ChunkState::Selected,
            margin: Some(0.1),
            topup_rounds: 0,
        }
    }

    fn manifest(entries: Vec<SelectionLogEntry>) -> SessionManifest {
        let n = entries.len();
        SessionManifest::build("s1", n, entries, Vec::new(), 0, &CostConfig::default())
    }

    #[test]
    fn counts_exact_and_top3() {
        let m = manifest(vec![
            entry(0, &[2, 0, 1], ChunkState::Selected),
            entry(1, &[0, 3, 1, 2], ChunkState::Selected),
            entry(2, &[1, 0, 4, 2], ChunkState::Selected),
            entry(3, &[0, 1], ChunkState::Selected),
        ]);
        let picks: HumanPicks = [(0, 2), (1, 1), (2, 2)].into_iter().collect();

        let result = validate(&m, &picks);
        assert_eq!(result.judged, 3);
        assert_eq!(result.exact, 1);
        assert_eq!(result.top3, 2);
        assert!((result.exact_pct - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.misses().map(|c| c.chunk_index).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn unpicked_chunks_are_not_judged() {
        let m = manifest(vec![entry(0, &[0], ChunkState::Selected)]);
        let result = validate(&m, &HumanPicks::new());
        assert_eq!(result.judged, 0);
        assert_eq!(result.exact_pct, 0.0);
    }

    #[test]
    fn unresolved_chunks_never_match_exactly() {
        let m = manifest(vec![
            entry(0, &[], ChunkState::Exhausted),
            entry(1, &[1, 0], ChunkState::Blocked),
        ]);
        let picks: HumanPicks = [(0, 0), (1, 1), (5, 0)].into_iter().collect();

        let result = validate(&m, &picks);
        assert_eq!(result.judged, 3);
        assert_eq!(result.exact, 0);
        // Blocked chunks still rank their survivors
        assert_eq!(result.top3, 1);
    }

    #[test]
    fn counts_are_ordered() {
        let m = manifest(vec![
            entry(0, &[0, 1, 2, 3], ChunkState::Selected),
            entry(1, &[3, 2, 1, 0], ChunkState::Selected),
            entry(2, &[1], ChunkState::Selected),
        ]);
        for pick in 0..4 {
            let picks: HumanPicks = (0..3).map(|c| (c, pick)).collect();
            let r = validate(&m, &picks);
            assert!(r.exact <= r.top3 && r.top3 <= r.judged);
        }
    }

    #[test]
    fn delta_against_previous() {
        let picks: HumanPicks = [(0, 0), (1, 0)].into_iter().collect();
        let before = validate(
            &manifest(vec![
                entry(0, &[1, 0], ChunkState::Selected),
                entry(1, &[1, 0], ChunkState::Selected),
            ]),
            &picks,
        );
        let after = validate(
            &manifest(vec![
                entry(0, &[0, 1], ChunkState::Selected),
                entry(1, &[1, 0], ChunkState::Selected),
            ]),
            &picks,
        )
        .compared_to(&before);

        let delta = after.delta.unwrap();
        assert!((delta.exact_pct - 50.0).abs() < 1e-9);
        assert_eq!(delta.top3_pct, 0.0);
    }

    #[test]
    fn result_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VALIDATION_FILE);
        assert_eq!(ValidationResult::load(&path).unwrap(), None);

        let picks: HumanPicks = [(0, 0)].into_iter().collect();
        let result = validate(&manifest(vec![entry(0, &[0], ChunkState::Selected)]), &picks);
        result.save(&path).unwrap();
        assert_eq!(ValidationResult::load(&path).unwrap(), Some(result));
    }
}
