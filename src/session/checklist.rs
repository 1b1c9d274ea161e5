//! Persisted record of fully resolved sessions.
//!
//! Every mutation re-reads the file before writing it back atomically, so
//! concurrent runs of different sessions under one root do not drop each
//! other's completions.

use crate::error::Result;
use crate::persist;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const CHECKLIST_FILE: &str = "checklist.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ChecklistFile {
    completed: BTreeSet<String>,
}

// Serializes read-modify-write cycles within this process
static WRITE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone)]
pub struct Checklist {
    path: PathBuf,
}

impl Checklist {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(CHECKLIST_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<ChecklistFile> {
        Ok(persist::read_json(&self.path)?.unwrap_or_default())
    }

    pub fn completed(&self) -> Result<BTreeSet<String>> {
        Ok(self.read()?.completed)
    }

    pub fn is_complete(&self, session: &str) -> Result<bool> {
        Ok(self.read()?.completed.contains(session))
    }

    pub fn mark_complete(&self, session: &str) -> Result<()> {
        self.update(|c| {
            c.completed.insert(session.to_string());
        })
    }

    /// Forget a completion so the next run processes the session again.
    pub fn clear(&self, session: &str) -> Result<()> {
        self.update(|c| {
            c.completed.remove(session);
        })
    }

    fn update(&self, change: impl FnOnce(&mut ChecklistFile)) -> Result<()> {
        let _guard = WRITE_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = self.read()?;
        let before = file.clone();
        change(&mut file);
        if file != before {
            persist::write_json(&self.path, &file)?;
        }
        Ok(())
    }
}
