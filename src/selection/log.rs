//! Append-only selection log, one directory per run.
//!
//! ```text
//! runs/0001/selection_log.jsonl
//! runs/0002/selection_log.jsonl
//! ```
//!
//! Earlier runs are never rewritten so decisions can be compared over time.

use super::types::SelectionLogEntry;
use crate::error::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const LOG_FILE: &str = "selection_log.jsonl";

/// Writer for one run's log.
#[derive(Debug)]
pub struct RunLog {
    run: u32,
    path: PathBuf,
    file: File,
}

/// Run numbers already present under `runs_dir`, ascending.
pub fn existing_runs(runs_dir: &Path) -> Result<Vec<u32>> {
    let entries = match fs::read_dir(runs_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut runs: Vec<u32> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
        .collect();
    runs.sort_unstable();
    Ok(runs)
}

impl RunLog {
    /// Open a fresh run directory numbered after the latest existing one.
    pub fn create(runs_dir: &Path) -> Result<Self> {
        fs::create_dir_all(runs_dir)?;
        let mut run = existing_runs(runs_dir)?.last().copied().unwrap_or(0) + 1;
        let dir = loop {
            let dir = runs_dir.join(format!("{:04}", run));
            match fs::create_dir(&dir) {
                Ok(()) => break dir,
                // Another process claimed this number first
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => run += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let path = dir.join(LOG_FILE);
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        tracing::debug!(run, path = %path.display(), "opened selection log");
        Ok(Self { run, path, file })
    }

    pub fn run(&self) -> u32 {
        self.run
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single JSON line and flush it to disk.
    pub fn append(&mut self, entry: &SelectionLogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Read every entry of a log file. A torn final line (interrupted write) is skipped.
pub fn read_log(path: &Path) -> Result<Vec<SelectionLogEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut lines = reader.lines().peekable();
    while let Some(line) = lines.next() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) if lines.peek().is_none() => {
                tracing::warn!(path = %path.display(), error = %e, "skipping torn final log line");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(entries)
}
