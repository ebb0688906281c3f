//! Durable per-query pagination progress
//!
//! The pipeline owns and mutates [`Checkpoint`] values; a
//! [`CheckpointStore`] only encodes, decodes and persists them.
//!
//! [`FileCheckpointStore`] keeps one JSON document per query. A save writes a
//! uniquely named temporary file next to the canonical one, syncs it, and
//! renames it into place, so a crash at any point leaves either the previous
//! or the new checkpoint on disk, never a torn one.

use crate::error::CheckpointError;
use crate::paths::file_stem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// How far one query has progressed through its result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub query_id: String,
    /// Index of the next record that has not been processed
    pub offset: u64,
    pub page_size: u32,
    /// Last total reported by the server; `None` until the first page
    pub total: Option<u64>,
    pub completed: bool,
}

impl Checkpoint {
    /// Fresh checkpoint for a query seen for the first time
    pub fn new(query_id: impl Into<String>, page_size: u32) -> Self {
        Self {
            query_id: query_id.into(),
            offset: 0,
            page_size,
            total: None,
            completed: false,
        }
    }

    /// Account for `processed` records from a page that reported `total`.
    ///
    /// Offset only grows, and `completed` is set once it reaches a known total.
    pub fn advance(&mut self, processed: u64, total: u64) {
        self.offset = self.offset.saturating_add(processed);
        self.total = Some(total);
        self.completed = self.offset >= total;
    }

    /// Records still expected according to the last known total
    pub fn remaining(&self) -> Option<u64> {
        self.total.map(|t| t.saturating_sub(self.offset))
    }
}

/// Persistence for checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored checkpoint for `query_id`, or `None` if the query is new
    async fn load(&self, query_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Atomically replace the stored checkpoint for `checkpoint.query_id`
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Stored checkpoint, or a fresh one at offset 0
    async fn load_or_new(
        &self,
        query_id: &str,
        page_size: u32,
    ) -> Result<Checkpoint, CheckpointError> {
        Ok(self
            .load(query_id)
            .await?
            .unwrap_or_else(|| Checkpoint::new(query_id, page_size)))
    }
}

/// One `<file_stem(query_id)>.json` file per query under a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Open (and create if needed) a checkpoint directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CheckpointError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical file for `query_id`
    pub fn path_for(&self, query_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(query_id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, query_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(query_id);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&path, e)),
        };

        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)
            .map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })?;

        if checkpoint.query_id != query_id {
            return Err(CheckpointError::Mismatch {
                path,
                expected: query_id.to_string(),
                found: checkpoint.query_id,
            });
        }
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.query_id);
        let data = serde_json::to_vec_pretty(checkpoint)?;
        atomic_write(&path, &data).await?;

        debug!(
            query_id = %checkpoint.query_id,
            offset = checkpoint.offset,
            completed = checkpoint.completed,
            path = %path.display(),
            "Checkpoint saved"
        );
        Ok(())
    }
}

/// Write to a sibling temp file, fsync, then rename over `path`
async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), CheckpointError> {
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("checkpoint"),
        uuid::Uuid::new_v4()
    );
    let temp_path = path.with_file_name(temp_name);

    let written = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        // leave no stray temp files behind on failure
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(CheckpointError::io(path, e));
    }

    // The rename is durable only once the directory entry is on disk.
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = tokio::fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
    }

    Ok(())
}

/// In-process store keeping the latest checkpoint and every save
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    latest: HashMap<String, Checkpoint>,
    history: Vec<Checkpoint>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `checkpoints`, as if saved by an earlier run
    pub fn with_checkpoints(checkpoints: impl IntoIterator<Item = Checkpoint>) -> Self {
        let latest = checkpoints
            .into_iter()
            .map(|cp| (cp.query_id.clone(), cp))
            .collect();
        Self {
            inner: Mutex::new(MemoryState {
                latest,
                history: Vec::new(),
            }),
        }
    }

    /// Every checkpoint saved so far, in save order
    pub async fn history(&self) -> Vec<Checkpoint> {
        self.inner.lock().await.history.clone()
    }

    /// Saves recorded for one query, in save order
    pub async fn history_for(&self, query_id: &str) -> Vec<Checkpoint> {
        self.inner
            .lock()
            .await
            .history
            .iter()
            .filter(|cp| cp.query_id == query_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, query_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.inner.lock().await.latest.get(query_id).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut state = self.inner.lock().await;
        state
            .latest
            .insert(checkpoint.query_id.clone(), checkpoint.clone());
        state.history.push(checkpoint.clone());
        Ok(())
    }
}
