//! Plain-text reports for manifests, validation results and sweeps.
//! Used by the CLI; library callers can print them or ignore them.

use crate::rank::Confidence;
use crate::selection::{ChunkState, SelectionLogEntry};
use crate::session::SessionManifest;
use crate::validation::{SweepReport, ValidationResult};
use std::fmt::Write;

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Wraps text in an ANSI color when enabled.
#[derive(Debug, Clone, Copy)]
pub struct Style {
    color: bool,
}

impl Style {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("{code}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

fn state_label(entry: &SelectionLogEntry, style: Style) -> String {
    match entry.state {
        ChunkState::Selected if entry.needs_human_review => style.paint(YELLOW, "FLAGGED"),
        ChunkState::Selected => style.paint(GREEN, "SELECTED"),
        ChunkState::Exhausted => style.paint(RED, "EXHAUSTED"),
        ChunkState::Blocked => style.paint(YELLOW, "BLOCKED"),
        other => other.to_string(),
    }
}

fn confidence_label(confidence: Confidence, style: Style) -> String {
    match confidence {
        Confidence::High => style.paint(GREEN, "high"),
        Confidence::Medium => confidence.to_string(),
        Confidence::Low => style.paint(YELLOW, "low"),
    }
}

/// One line per chunk plus the summary block.
pub fn render_manifest(manifest: &SessionManifest, style: Style) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session {}", manifest.session);
    for entry in &manifest.entries {
        let pick = entry
            .selected
            .as_ref()
            .map(|s| format!("v{} score {:.3}", s.version(), s.rank_score))
            .unwrap_or_else(|| "-".to_string());
        let margin = entry
            .margin
            .map(|m| format!("{:.3}", m))
            .unwrap_or_else(|| "n/a".to_string());
        let _ = write!(
            out,
            "  chunk {:>3}  {:<9}  {:<16}  {}/{} kept  margin {}  {}",
            entry.chunk_index,
            state_label(entry, style),
            pick,
            entry.remaining.len(),
            entry.total_candidates,
            margin,
            confidence_label(entry.confidence, style),
        );
        if entry.topup_rounds > 0 {
            let _ = write!(out, "  {}", style.paint(DIM, &format!("topup x{}", entry.topup_rounds)));
        }
        out.push('\n');
    }

    let s = &manifest.summary;
    let _ = writeln!(
        out,
        "{} chunks: {} resolved, {} flagged, {} blocked, {} exhausted, {} undecided",
        s.chunk_count, s.resolved, s.flagged, s.blocked, s.exhausted, s.undecided
    );
    let _ = writeln!(
        out,
        "{} candidates ({} below pre-filter), est. ${:.2} / {:.0}s synthesis",
        s.total_candidates, s.below_prefilter, s.estimated_cost_usd, s.estimated_synthesis_secs
    );
    for failure in &manifest.failures {
        let _ = writeln!(
            out,
            "{} chunk {}: {}",
            style.paint(RED, "error:"),
            failure.chunk_index,
            failure.error
        );
    }
    out
}

fn signed(delta: f64) -> String {
    format!("{:+.1}", delta)
}

pub fn render_validation(result: &ValidationResult, style: Style) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "Session {}: exact {}/{} ({:.1}%), top-3 {}/{} ({:.1}%)",
        result.session,
        result.exact,
        result.judged,
        result.exact_pct,
        result.top3,
        result.judged,
        result.top3_pct
    );
    if let Some(delta) = result.delta {
        let paint = |d: f64| {
            let text = signed(d);
            if d > 0.0 {
                style.paint(GREEN, &text)
            } else if d < 0.0 {
                style.paint(RED, &text)
            } else {
                text
            }
        };
        let _ = write!(
            out,
            "  [exact {} pts, top-3 {} pts]",
            paint(delta.exact_pct),
            paint(delta.top3_pct)
        );
    }
    out.push('\n');
    for miss in result.misses() {
        let auto = miss
            .selected
            .map(|v| format!("v{}", v))
            .unwrap_or_else(|| "none".to_string());
        let _ = writeln!(
            out,
            "  chunk {:>3}: human v{}, auto {}{}",
            miss.chunk_index,
            miss.human,
            auto,
            if miss.in_top3 { " (in top-3)" } else { "" }
        );
    }
    out
}

/// Ranked configurations, best first, with each row's per-session rates.
pub fn render_sweep(report: &SweepReport, limit: usize, style: Style) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:>7} {:>6} {:>6} {:>6} {:>8}  {:>8} {:>8} {:>8} {:>8}",
        "rank", "quality", "echo", "tonal", "hiss", "duration", "loo-min", "exact", "top-3", "worst"
    );
    for (i, row) in report.rows.iter().take(limit).enumerate() {
        let w = &row.weights;
        let line = format!(
            "{:>4}  {:>7} {:>6} {:>6} {:>6} {:>8}  {:>7.1}% {:>7.1}% {:>7.1}% {:>7.1}%",
            i + 1,
            w.quality,
            w.echo,
            w.tonal,
            w.hiss,
            w.duration,
            row.loo_min_exact_pct,
            row.macro_exact_pct,
            row.macro_top3_pct,
            row.worst_exact_pct
        );
        if i == 0 {
            let _ = writeln!(out, "{}", style.paint(GREEN, &line));
        } else {
            let _ = writeln!(out, "{}", line);
        }
        let breakdown: Vec<String> = row
            .sessions
            .iter()
            .map(|s| format!("{} {:.0}%", s.session, s.exact_pct))
            .collect();
        let _ = writeln!(out, "      {}", style.paint(DIM, &breakdown.join(", ")));
    }
    if report.rows.len() > limit {
        let _ = writeln!(out, "({} more configurations)", report.rows.len() - limit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Candidate;
    use crate::rank::RankedCandidate;
    use crate::session::{ChunkFailure, CostConfig};
    use crate::validation::ValidationDelta;

    fn manifest() -> SessionManifest {
        let winner = RankedCandidate {
            candidate: Candidate::new(0, 2, "a.wav"),
            rank_score: 0.8126,
            contributions: Default::default(),
        };
        let selected = SelectionLogEntry {
            chunk_index: 0,
            state: ChunkState::Selected,
            total_candidates: 3,
            eliminated: Vec::new(),
            remaining: vec![winner.clone()],
            selected: Some(winner),
            confidence: Confidence::High,
            needs_human_review: false,
            margin: None,
            topup_rounds: 1,
        };
        let exhausted = SelectionLogEntry {
            chunk_index: 1,
            state: ChunkState::Exhausted,
            total_candidates: 2,
            eliminated: Vec::new(),
            remaining: Vec::new(),
            selected: None,
            confidence: Confidence::Low,
            needs_human_review: true,
            margin: None,
            topup_rounds: 3,
        };
        SessionManifest::build(
            "s1",
            2,
            vec![selected, exhausted],
            vec![ChunkFailure {
                chunk_index: 1,
                error: "no acceptable candidates".to_string(),
            }],
            1,
            &CostConfig::default(),
        )
    }

    #[test]
    fn manifest_report_lists_every_chunk() {
        let text = render_manifest(&manifest(), Style::new(false));
        assert!(text.contains("chunk   0  SELECTED"));
        assert!(text.contains("v2 score 0.813"));
        assert!(text.contains("chunk   1  EXHAUSTED"));
        assert!(text.contains("1 resolved, 0 flagged, 0 blocked, 1 exhausted"));
        assert!(text.contains("error: chunk 1: no acceptable candidates"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn color_only_when_enabled() {
        let text = render_manifest(&manifest(), Style::new(true));
        assert!(text.contains(GREEN));
    }

    #[test]
    fn validation_report_shows_delta_and_misses() {
        let result = ValidationResult {
            session: "s1".to_string(),
            judged: 2,
            exact: 1,
            exact_pct: 50.0,
            top3: 2,
            top3_pct: 100.0,
            chunks: vec![crate::validation::ChunkVerdict {
                chunk_index: 4,
                human: 1,
                selected: Some(0),
                exact: false,
                in_top3: true,
            }],
            delta: Some(ValidationDelta {
                exact_pct: 12.5,
                top3_pct: 0.0,
            }),
        };
        let text = render_validation(&result, Style::new(false));
        assert!(text.starts_with("Session s1: exact 1/2 (50.0%), top-3 2/2 (100.0%)"));
        assert!(text.contains("exact +12.5 pts"));
        assert!(text.contains("chunk   4: human v1, auto v0 (in top-3)"));
    }
}
