//! On-disk session layout.
//!
//! ```text
//! <root>/checklist.json
//! <root>/<id>/session.json
//! <root>/<id>/topup.jsonl
//! <root>/<id>/features.json
//! <root>/<id>/progress.json
//! <root>/<id>/runs/<NNNN>/selection_log.jsonl
//! <root>/<id>/manifest.json
//! <root>/<id>/human_picks.json
//! ```

use crate::error::{Result, TakepickError};
use crate::model::{Candidate, Chunk};
use crate::persist;
use crate::selection::SelectionLogEntry;
use crate::session::manifest::SessionManifest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Chunks and initial candidate pool of one session (`session.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl SessionSpec {
    /// Sort chunks by index and reject duplicate indices.
    fn normalize(mut self, id: &str) -> Result<Self> {
        self.chunks.sort_by_key(|c| c.index);
        let mut seen = BTreeSet::new();
        for chunk in &self.chunks {
            if !seen.insert(chunk.index) {
                return Err(TakepickError::Store {
                    message: format!("session {} lists chunk {} twice", id, chunk.index),
                });
            }
        }
        Ok(self)
    }

    /// First chunk is the opening, last the closing, unless flagged explicitly.
    fn infer_roles(mut self) -> Self {
        if !self.chunks.iter().any(|c| c.is_opening)
            && let Some(first) = self.chunks.first_mut()
        {
            first.is_opening = true;
        }
        if !self.chunks.iter().any(|c| c.is_closing)
            && let Some(last) = self.chunks.last_mut()
        {
            last.is_closing = true;
        }
        self
    }
}

/// Latest committed decision per chunk (`progress.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub entries: BTreeMap<u32, SelectionLogEntry>,
}

/// Human verdicts: chunk index → chosen version.
pub type HumanPicks = BTreeMap<u32, u32>;

#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.session_dir(id).join("session.json").is_file()
    }

    /// Ids of every directory under the root holding a `session.json`.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|id| self.exists(id))
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn load_session(&self, id: &str) -> Result<SessionSpec> {
        let path = self.session_dir(id).join("session.json");
        let spec: SessionSpec =
            persist::read_json(&path)?.ok_or_else(|| TakepickError::SessionNotFound {
                session: id.to_string(),
                root: self.root.display().to_string(),
            })?;
        Ok(spec.normalize(id)?.infer_roles())
    }

    pub fn save_session(&self, id: &str, spec: &SessionSpec) -> Result<()> {
        persist::write_json(&self.session_dir(id).join("session.json"), spec)
    }

    /// Resolve a candidate's audio reference against the session directory.
    pub fn audio_path(&self, id: &str, candidate: &Candidate) -> PathBuf {
        if candidate.audio.is_absolute() {
            candidate.audio.clone()
        } else {
            self.session_dir(id).join(&candidate.audio)
        }
    }

    pub fn features_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("features.json")
    }

    pub fn runs_dir(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("runs")
    }

    /// Record top-up candidates so later runs see the enlarged pool.
    pub fn append_topup(&self, id: &str, candidates: &[Candidate]) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        let path = self.session_dir(id).join("topup.jsonl");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut buf = Vec::new();
        for candidate in candidates {
            serde_json::to_writer(&mut buf, candidate)?;
            buf.push(b'\n');
        }
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn load_topups(&self, id: &str) -> Result<Vec<Candidate>> {
        let path = self.session_dir(id).join("topup.jsonl");
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(candidate) => out.push(candidate),
                Err(e) => {
                    tracing::warn!(session = id, error = %e, "skipping unreadable top-up record")
                }
            }
        }
        Ok(out)
    }

    /// Initial pool plus every recorded top-up, in arrival order.
    ///
    /// A repeated `(chunk, version)` keeps its first occurrence.
    pub fn load_pool(&self, id: &str, spec: &SessionSpec) -> Result<Vec<Candidate>> {
        let mut seen = BTreeSet::new();
        let mut pool = Vec::new();
        for candidate in spec.candidates.iter().cloned().chain(self.load_topups(id)?) {
            if seen.insert(candidate.id()) {
                pool.push(candidate);
            } else {
                tracing::warn!(
                    session = id,
                    candidate = %candidate.id(),
                    "ignoring duplicate candidate version"
                );
            }
        }
        Ok(pool)
    }

    pub fn load_progress(&self, id: &str) -> Result<Progress> {
        Ok(persist::read_json(&self.session_dir(id).join("progress.json"))?.unwrap_or_default())
    }

    pub fn save_progress(&self, id: &str, progress: &Progress) -> Result<()> {
        persist::write_json(&self.session_dir(id).join("progress.json"), progress)
    }

    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("manifest.json")
    }

    pub fn load_manifest(&self, id: &str) -> Result<Option<SessionManifest>> {
        persist::read_json(&self.manifest_path(id))
    }

    pub fn save_manifest(&self, id: &str, manifest: &SessionManifest) -> Result<()> {
        persist::write_json(&self.manifest_path(id), manifest)
    }

    /// Human picks, `None` when the session has not been judged.
    pub fn load_human_picks(&self, id: &str) -> Result<Option<HumanPicks>> {
        let raw: Option<BTreeMap<String, u32>> =
            persist::read_json(&self.session_dir(id).join("human_picks.json"))?;
        raw.map(|map| {
            map.into_iter()
                .map(|(chunk, version)| {
                    chunk
                        .trim()
                        .parse::<u32>()
                        .map(|c| (c, version))
                        .map_err(|_| TakepickError::Store {
                            message: format!(
                                "human_picks.json for {} has non-numeric chunk key '{}'",
                                id, chunk
                            ),
                        })
                })
                .collect()
        })
        .transpose()
    }

    pub fn save_human_picks(&self, id: &str, picks: &HumanPicks) -> Result<()> {
        persist::write_json(&self.session_dir(id).join("human_picks.json"), picks)
    }
}
