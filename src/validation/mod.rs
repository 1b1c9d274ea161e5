//! Offline comparison of automatic selections with human verdicts, and
//! weight sweeps across judged sessions.

pub mod harness;
pub mod sweep;

pub use harness::{ChunkVerdict, VALIDATION_FILE, ValidationDelta, ValidationResult, validate};
pub use sweep::{GatedSession, SweepReport, SweepRow, WeightGrid, sweep};
