//! File checkpoint of in-flight loop state
//!
//! Written at each round boundary as human-readable JSON. The session ledger
//! in the task graph is the authoritative record; this file is an export
//! that also carries pending gaps and operator answers.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::Gap;

/// Errors from checkpoint persistence
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Malformed checkpoint {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CheckpointError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Point-in-time snapshot of loop progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last completed iteration
    pub iteration: u32,

    pub completed_tasks: Vec<String>,

    pub pending_gaps: Vec<Gap>,

    /// Operator answers to escalated questions; sorted for stable output
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

impl Checkpoint {
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            ..Default::default()
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `checkpoint` to `path` atomically (temp file + rename)
pub fn save(checkpoint: &Checkpoint, path: &Path) -> Result<(), CheckpointError> {
    debug!(path = %path.display(), iteration = %checkpoint.iteration, "save: called");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(checkpoint)?;

    // Serialize concurrent writers of the same checkpoint
    let lock_file_path = lock_path(path);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_file_path)
        .map_err(|e| CheckpointError::io(&lock_file_path, e))?;
    lock.lock_exclusive()
        .map_err(|e| CheckpointError::io(&lock_file_path, e))?;

    let tmp = tmp_path(path);
    let written = (|| -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    let _ = FileExt::unlock(&lock);
    written.map_err(|e| {
        let _ = fs::remove_file(&tmp);
        CheckpointError::io(path, e)
    })?;

    info!(path = %path.display(), iteration = %checkpoint.iteration, "Checkpoint saved");
    Ok(())
}

/// Read a checkpoint; a missing or malformed file is an error
pub fn load(path: &Path) -> Result<Checkpoint, CheckpointError> {
    debug!(path = %path.display(), "load: called");
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(CheckpointError::io(path, e)),
    };

    serde_json::from_str(&content).map_err(|source| CheckpointError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove a checkpoint; an absent file is not an error
pub fn delete(path: &Path) -> Result<(), CheckpointError> {
    debug!(path = %path.display(), "delete: called");
    match fs::remove_file(path) {
        Ok(()) => {
            let _ = fs::remove_file(lock_path(path));
            info!(path = %path.display(), "Checkpoint deleted");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("delete: already absent");
            Ok(())
        }
        Err(e) => Err(CheckpointError::io(path, e)),
    }
}
