//! Durable task records: one JSON file per task.
//!
//! ```text
//! tasks_dir/
//! ├── task_3f2a…e1.json
//! └── task_9b07…4c.json
//! ```
//!
//! ## Why write-then-rename?
//!
//! The orchestrator checkpoints twice per item and the background ticker
//! checkpoints on a timer, while `status` queries from another process may
//! read the same file at any moment. Every save writes a uniquely named
//! temp file in the same directory, syncs it, and renames it over the
//! record. `rename` within one directory is atomic, so a reader sees either
//! the old snapshot or the new one, never a torn file.

use crate::config::BatchConfig;
use crate::error::TaskError;
use crate::model::{TaskRecord, TaskStatus, TaskSummary};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// The status fields of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StatusProbe {
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "crate::model::timestamp::optional")]
    pub end_time: Option<DateTime<Utc>>,
}

/// File-backed store of [`TaskRecord`]s.
#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
    prefix: String,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(&config.tasks_dir, &config.task_file_prefix)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `task_id`.
    pub fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}.json", self.prefix, task_id))
    }

    /// Persist a brand-new record. Fails if one already exists for its id.
    pub async fn create(&self, record: &TaskRecord) -> Result<(), TaskError> {
        let path = self.record_path(&record.task_id);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| TaskError::persistence(&path, e))?
        {
            return Err(TaskError::persistence(
                &path,
                format!("a record for task '{}' already exists", record.task_id),
            ));
        }
        self.save(record).await
    }

    /// Overwrite the record with the given snapshot, atomically.
    pub async fn save(&self, record: &TaskRecord) -> Result<(), TaskError> {
        let path = self.record_path(&record.task_id);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| TaskError::persistence(&path, format!("serialise: {e}")))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| TaskError::persistence(&self.dir, e))?;

        let tmp_path = self
            .dir
            .join(format!(".{}{}.{}.tmp", self.prefix, record.task_id, Uuid::new_v4()));

        if let Err(e) = write_synced(&tmp_path, &json).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(TaskError::persistence(&tmp_path, e));
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(TaskError::persistence(&path, e));
        }

        debug!(
            "Saved task {} ({}, {}/{} done)",
            record.task_id, record.status, record.processed_count, record.total_items
        );
        Ok(())
    }

    /// Load the record for `task_id`.
    pub async fn load(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.read_json(task_id).await
    }

    /// Read only the persisted status of a task, skipping the item map.
    pub async fn load_status(&self, task_id: &str) -> Result<StatusProbe, TaskError> {
        self.read_json(task_id).await
    }

    /// Summaries of every readable record, newest first.
    ///
    /// A missing directory is an empty store. Records that fail to parse are
    /// logged and skipped so one corrupt file does not hide the rest.
    pub async fn list(&self) -> Result<Vec<TaskSummary>, TaskError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TaskError::persistence(&self.dir, e)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TaskError::persistence(&self.dir, e))?
        {
            let name = entry.file_name();
            let Some(task_id) = name
                .to_str()
                .and_then(|n| n.strip_prefix(self.prefix.as_str()))
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };

            match self.load(task_id).await {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => warn!("Skipping unreadable task record {:?}: {}", name, e),
            }
        }

        summaries.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        Ok(summaries)
    }

    async fn read_json<T: DeserializeOwned>(&self, task_id: &str) -> Result<T, TaskError> {
        let path = self.record_path(task_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TaskError::NotFound {
                    task_id: task_id.to_string(),
                })
            }
            Err(e) => return Err(TaskError::persistence(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| TaskError::persistence(&path, format!("parse: {e}")))
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}
