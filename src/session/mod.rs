//! Session orchestration, persistence and the synthesis collaborator.

pub mod checklist;
pub mod manifest;
pub mod orchestrator;
pub mod store;
pub mod synth;

pub use checklist::Checklist;
pub use manifest::{ChunkFailure, CostConfig, ManifestSummary, SessionManifest};
pub use orchestrator::{Orchestrator, RunOptions, RunOutcome, SessionSettings};
pub use store::{HumanPicks, Progress, SessionSpec, SessionStore};
pub use synth::{
    MockResponse, MockSynthesizer, NullSynthesizer, RetryPolicy, SynthesisRequest, Synthesizer,
    synthesize_with_retry,
};

#[cfg(feature = "http-synth")]
pub use synth::HttpSynthesizer;
