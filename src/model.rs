//! Core data types shared by every stage: chunks and their candidates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One text segment of a narration script, synthesized independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u32,
    pub text: String,
    /// Character count of `text`; filled from the text when omitted.
    #[serde(default)]
    pub char_count: usize,
    #[serde(default)]
    pub is_opening: bool,
    #[serde(default)]
    pub is_closing: bool,
}

impl Chunk {
    pub fn new(index: u32, text: &str) -> Self {
        Self {
            index,
            text: text.to_string(),
            char_count: text.chars().count(),
            is_opening: false,
            is_closing: false,
        }
    }

    pub fn opening(mut self) -> Self {
        self.is_opening = true;
        self
    }

    pub fn closing(mut self) -> Self {
        self.is_closing = true;
        self
    }

    /// Character count, derived from the text when the stored count is zero.
    pub fn chars(&self) -> usize {
        if self.char_count == 0 {
            self.text.chars().count()
        } else {
            self.char_count
        }
    }
}

/// Identity of a candidate: `(chunk_index, version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateId {
    pub chunk_index: u32,
    pub version: u32,
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}", self.chunk_index, self.version)
    }
}

/// One synthesized rendering of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk_index: u32,
    pub version: u32,
    /// Audio reference, relative to the session directory unless absolute.
    pub audio: PathBuf,
    #[serde(default)]
    pub duration_secs: f64,
    /// Raw quality score reported by the synthesis collaborator (0.0..=1.0).
    #[serde(default)]
    pub quality_score: f64,
}

impl Candidate {
    pub fn new(chunk_index: u32, version: u32, audio: impl Into<PathBuf>) -> Self {
        Self {
            chunk_index,
            version,
            audio: audio.into(),
            duration_secs: 0.0,
            quality_score: 0.0,
        }
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = quality_score;
        self
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn id(&self) -> CandidateId {
        CandidateId {
            chunk_index: self.chunk_index,
            version: self.version,
        }
    }
}
