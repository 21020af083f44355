//! Job directory layout and per-identifier serialization.
//!
//! Every job lives under `{root}/{identifier}`:
//! - `seq/frame_NNN.{ext}`: the frame sequence
//! - `manifest.json`: written after a successful capture
//! - `payload.zip`: created at upload time, replaced on every retry
//!
//! Jobs are never deleted here; retention belongs to whoever owns the root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{PipelineError, Result};

pub const SEQ_DIR: &str = "seq";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ARCHIVE_FILE: &str = "payload.zip";
const MAX_IDENTIFIER_LEN: usize = 64;

/// Rejects identifiers that are not a single safe path segment.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(PipelineError::InvalidInput(format!(
            "identifier must be 1..={} characters",
            MAX_IDENTIFIER_LEN
        )));
    }
    if identifier.starts_with('.') {
        return Err(PipelineError::InvalidInput(
            "identifier must not start with '.'".to_string(),
        ));
    }
    if let Some(bad) = identifier
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == '.'))
    {
        return Err(PipelineError::InvalidInput(format!(
            "identifier contains forbidden character {:?}",
            bad
        )));
    }
    Ok(())
}

/// Root directory holding all job directories.
#[derive(Clone, Debug)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job(&self, identifier: &str) -> Result<JobDir> {
        validate_identifier(identifier)?;
        Ok(JobDir {
            identifier: identifier.to_string(),
            path: self.root.join(identifier),
        })
    }
}

/// Paths of a single, validated job.
#[derive(Clone, Debug)]
pub struct JobDir {
    identifier: String,
    path: PathBuf,
}

impl JobDir {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seq_dir(&self) -> PathBuf {
        self.path.join(SEQ_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.path.join(ARCHIVE_FILE)
    }

    /// Creates the job and sequence directories if missing.
    pub fn prepare(&self) -> Result<()> {
        let seq = self.seq_dir();
        std::fs::create_dir_all(&seq)
            .map_err(|e| PipelineError::storage(format!("create {}", seq.display()), e))
    }

    /// Deletes frame files left by an earlier capture; returns how many.
    pub fn clear_frames(&self, ext: &str) -> Result<usize> {
        let frames = self.list_frames(ext)?;
        for frame in &frames {
            std::fs::remove_file(frame)
                .map_err(|e| PipelineError::storage(format!("remove {}", frame.display()), e))?;
        }
        Ok(frames.len())
    }

    /// Frame files with the given extension, sorted by file name.
    pub fn list_frames(&self, ext: &str) -> Result<Vec<PathBuf>> {
        list_frames(&self.seq_dir(), ext)
    }

    /// Number of frames currently on disk; 0 if nothing was captured yet.
    pub fn progress(&self, ext: &str) -> Result<usize> {
        if !self.seq_dir().is_dir() {
            return Ok(0);
        }
        Ok(self.list_frames(ext)?.len())
    }
}

/// File name for the 1-based sequence number the device writes.
pub fn frame_file_name(index: u32, ext: &str) -> String {
    format!("frame_{:03}.{}", index, ext)
}

pub(crate) fn list_frames(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PipelineError::storage(format!("read {}", dir.display()), e))?;
    let mut frames = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| PipelineError::storage(format!("read {}", dir.display()), e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
            .unwrap_or(false);
        if matches {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// In-process lock table: one mutex per identifier so two requests for the
/// same job never interleave writes into its directory.
#[derive(Default)]
pub struct JobLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `identifier`; hold its guard for the whole job step.
    pub fn lock_for(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut table = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the entry for `identifier` once no caller holds its lock, so the
    /// table only holds identifiers with a step in flight.
    pub fn prune(&self, identifier: &str) {
        let mut table = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(lock) = table.get(identifier) {
            if Arc::strong_count(lock) == 1 {
                table.remove(identifier);
            }
        }
    }

    /// Identifiers currently tracked.
    pub fn len(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Acquire a job lock. A poisoned lock is still handed out.
pub fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
