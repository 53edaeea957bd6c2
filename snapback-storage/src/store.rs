// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The snapshot store: create / list / get / restore over a workspace-local
//! state directory.
//!
//! Layout: `.snapback/snapshots.db` (bincode index) plus
//! `.snapback/blobs/<digest>` content-addressed blobs. The process is the
//! single writer; a commit mutex serializes create against itself so
//! concurrent duplicate creates both observe the same id without corrupting
//! the index.

use crate::digest::ContentDigest;
use crate::snapshot::{snapshot_id, Snapshot, SnapshotFile};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use snapback_core::paths::{validate_relative_path, validate_workspace_path};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Name of the workspace-local state directory.
pub const STATE_DIR: &str = ".snapback";
/// Upper bound on `list()` results.
pub const DEFAULT_LIST_CAP: usize = 500;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot index is corrupted: {0}")]
    Encode(#[from] bincode::Error),
    #[error("invalid path in file set: {reason}")]
    InvalidPath { reason: &'static str },
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error("snapshot file set is empty")]
    EmptyFileSet,
}

/// Input file for `create`.
#[derive(Debug, Clone)]
pub struct NewSnapshotFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub description: Option<String>,
    pub protected: bool,
}

/// Result of `create`: the record plus whether an existing snapshot was
/// reused.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub snapshot: Snapshot,
    pub deduplicated: bool,
}

/// Result of `restore`. Partial failures land in `errors`; files already
/// written are not rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub success: bool,
    #[serde(rename = "restoredFiles")]
    pub restored_files: Vec<String>,
    pub errors: Vec<String>,
}

pub struct SnapshotStore {
    blob_dir: PathBuf,
    index_path: PathBuf,
    index: RwLock<HashMap<String, Snapshot>>,
    commit_lock: Mutex<()>,
    list_cap: usize,
}

impl SnapshotStore {
    /// Open (creating on first use) the store under `workspace_root`.
    pub fn open(workspace_root: &Path) -> Result<Self, SnapshotError> {
        let state_dir = workspace_root.join(STATE_DIR);
        let blob_dir = state_dir.join("blobs");
        std::fs::create_dir_all(&blob_dir)?;
        let index_path = state_dir.join("snapshots.db");

        let index = if index_path.exists() {
            let raw = std::fs::read(&index_path)?;
            let snapshots: Vec<Snapshot> = bincode::deserialize(&raw)?;
            snapshots.into_iter().map(|s| (s.id.clone(), s)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            blob_dir,
            index_path,
            index: RwLock::new(index),
            commit_lock: Mutex::new(()),
            list_cap: DEFAULT_LIST_CAP,
        })
    }

    /// Create a snapshot; identical file sets dedup to the existing record.
    pub fn create(
        &self,
        files: Vec<NewSnapshotFile>,
        options: SnapshotOptions,
    ) -> Result<CreateOutcome, SnapshotError> {
        if files.is_empty() {
            return Err(SnapshotError::EmptyFileSet);
        }
        for file in &files {
            validate_relative_path(&file.path)
                .map_err(|v| SnapshotError::InvalidPath { reason: v.reason() })?;
        }

        let entries: Vec<(String, ContentDigest)> = files
            .iter()
            .map(|f| {
                (
                    f.path.clone(),
                    ContentDigest::from_content(f.content.as_bytes()),
                )
            })
            .collect();
        let id = snapshot_id(&entries);

        let _commit = self.commit_lock.lock();

        if let Some(existing) = self.index.read().get(&id) {
            return Ok(CreateOutcome {
                snapshot: existing.clone(),
                deduplicated: true,
            });
        }

        // Blobs first: the id only becomes observable once every blob is
        // durable, so readers always see a complete record.
        for (file, (_, digest)) in files.iter().zip(&entries) {
            let blob_path = self.blob_dir.join(digest.to_hex());
            if !blob_path.exists() {
                atomic_write(&blob_path, file.content.as_bytes())?;
            }
        }

        let mut snapshot_files: Vec<SnapshotFile> = files
            .iter()
            .zip(&entries)
            .map(|(file, (_, digest))| SnapshotFile {
                path: file.path.clone(),
                digest: digest.to_hex(),
                size: file.content.len() as u64,
            })
            .collect();
        snapshot_files.sort_by(|a, b| a.path.as_bytes().cmp(b.path.as_bytes()));

        let snapshot = Snapshot {
            id: id.clone(),
            created_at_ms: now_ms(),
            description: options.description,
            protected: options.protected,
            files: snapshot_files,
        };

        self.index.write().insert(id, snapshot.clone());
        self.persist_index()?;

        tracing::debug!(id = %snapshot.id, files = snapshot.files.len(), "snapshot created");
        Ok(CreateOutcome {
            snapshot,
            deduplicated: false,
        })
    }

    /// Snapshots in descending creation order, capped.
    pub fn list(&self) -> Vec<Snapshot> {
        let mut snapshots: Vec<Snapshot> = self.index.read().values().cloned().collect();
        snapshots.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        snapshots.truncate(self.list_cap);
        snapshots
    }

    pub fn get(&self, id: &str) -> Option<Snapshot> {
        self.index.read().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.index.read().len()
    }

    /// Restore a snapshot. Without `target` this is metadata-only: the file
    /// list is reported and nothing is written. With `target`, every
    /// destination is validated against the target root and written
    /// atomically (temp + rename).
    pub fn restore(
        &self,
        id: &str,
        target: Option<&Path>,
    ) -> Result<RestoreOutcome, SnapshotError> {
        let snapshot = self
            .get(id)
            .ok_or_else(|| SnapshotError::NotFound(id.to_string()))?;

        let Some(target) = target else {
            return Ok(RestoreOutcome {
                success: true,
                restored_files: snapshot.files.iter().map(|f| f.path.clone()).collect(),
                errors: Vec::new(),
            });
        };

        std::fs::create_dir_all(target)?;
        let mut restored_files = Vec::new();
        let mut errors = Vec::new();

        for file in &snapshot.files {
            let relative = Path::new(&file.path);
            if let Some(parent) = relative.parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(target.join(parent)) {
                        errors.push(format!("{}: {e}", file.path));
                        continue;
                    }
                }
            }

            let destination = match validate_workspace_path(&file.path, target) {
                Ok(path) => path,
                Err(violation) => {
                    errors.push(format!("{}: {}", file.path, violation.reason()));
                    continue;
                }
            };

            let blob_path = self.blob_dir.join(&file.digest);
            let content = match std::fs::read(&blob_path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    errors.push(format!("{}: missing blob ({e})", file.path));
                    continue;
                }
            };

            match atomic_write(&destination, &content) {
                Ok(()) => restored_files.push(file.path.clone()),
                Err(e) => errors.push(format!("{}: {e}", file.path)),
            }
        }

        Ok(RestoreOutcome {
            success: errors.is_empty(),
            restored_files,
            errors,
        })
    }

    fn persist_index(&self) -> Result<(), SnapshotError> {
        let snapshots: Vec<Snapshot> = self.index.read().values().cloned().collect();
        let raw = bincode::serialize(&snapshots)?;
        atomic_write(&self.index_path, &raw)?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Write-temp-then-rename so a crash never leaves a half-written file at
/// the destination.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp = parent.join(format!(
        ".snapback-tmp-{}-{}",
        std::process::id(),
        seq
    ));
    std::fs::write(&temp, bytes)?;
    match std::fs::rename(&temp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&temp);
            Err(e)
        }
    }
}
