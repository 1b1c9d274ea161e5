//! Persisted per-session feature cache.
//!
//! Vectors are keyed by candidate and stamped with a digest of the audio bytes
//! and of the extraction context. A lookup only hits when both digests match,
//! so a replaced audio file or a different previous selection forces
//! re-extraction.

use crate::audio::wav::AudioBuffer;
use crate::error::Result;
use crate::features::{ExtractionContext, FeatureVector};
use crate::model::CandidateId;
use crate::persist;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub chunk_index: u32,
    pub version: u32,
    pub audio_digest: String,
    pub context_digest: String,
    pub features: FeatureVector,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCache {
    entries: BTreeMap<String, CacheEntry>,
}

fn key(id: CandidateId) -> String {
    format!("{}:{}", id.chunk_index, id.version)
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(persist::read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_json(path, self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached vector if both digests still match.
    pub fn lookup(
        &self,
        id: CandidateId,
        audio_digest: &str,
        context_digest: &str,
    ) -> Option<&FeatureVector> {
        self.entries
            .get(&key(id))
            .filter(|e| e.audio_digest == audio_digest && e.context_digest == context_digest)
            .map(|e| &e.features)
    }

    /// Most recent vector for a candidate regardless of digests.
    pub fn latest(&self, id: CandidateId) -> Option<&FeatureVector> {
        self.entries.get(&key(id)).map(|e| &e.features)
    }

    /// Store a vector. Vectors holding non-finite values are not cached
    /// because they cannot round-trip through JSON.
    pub fn insert(
        &mut self,
        id: CandidateId,
        audio_digest: String,
        context_digest: String,
        features: FeatureVector,
    ) -> bool {
        if features.values.values().any(|v| !v.is_finite()) {
            return false;
        }
        self.entries.insert(
            key(id),
            CacheEntry {
                chunk_index: id.chunk_index,
                version: id.version,
                audio_digest,
                context_digest,
                features,
            },
        );
        true
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }
}

/// SHA-256 of raw bytes as lowercase hex.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Digest of everything in the context that influences extraction.
pub fn context_digest(context: &ExtractionContext<'_>) -> String {
    let mut hasher = Sha256::new();
    let flags = context.flags();
    hasher.update([
        flags.has_previous as u8,
        flags.is_opening as u8,
        flags.is_closing as u8,
    ]);
    hasher.update((context.chunk.chars() as u64).to_le_bytes());
    if let Some(tail) = context.previous_tail {
        hash_audio(&mut hasher, tail);
    }
    format!("{:x}", hasher.finalize())
}

fn hash_audio(hasher: &mut Sha256, audio: &AudioBuffer) {
    hasher.update(audio.sample_rate().to_le_bytes());
    for s in audio.samples() {
        hasher.update(s.to_le_bytes());
    }
}
