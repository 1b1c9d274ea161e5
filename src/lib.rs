//! takepick - candidate selection and quality gating for synthesized narration
//!
//! Measures every synthesized take of a chunk, eliminates defective ones
//! through independent gates, ranks the survivors and commits one pick per
//! chunk in script order.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod features;
pub mod gates;
pub mod model;
pub mod output;
pub mod persist;
pub mod rank;
pub mod selection;
pub mod session;
pub mod validation;

// Collaborator traits
pub use audio::{AudioDecoder, CommandExecutor, SystemCommandExecutor};
pub use features::FeatureExtractor;
pub use gates::Gate;
pub use session::Synthesizer;

// Pipeline
pub use gates::{GatePipeline, ThresholdConfig};
pub use rank::{WeightConfig, rank};
pub use selection::{ChunkSelector, SelectionLogEntry};
pub use session::{Orchestrator, RunOptions, RunOutcome, SessionManifest, SessionStore};
pub use validation::{ValidationResult, validate};

// Error handling
pub use error::{Result, TakepickError};

// Config
pub use config::Config;

// Data model
pub use model::{Candidate, CandidateId, Chunk};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(ver.contains('+'), "expected '+' in {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
