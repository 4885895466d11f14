//! Task and work-item records.
//!
//! These are plain data types: the only behaviour here is transition
//! bookkeeping (stamping times, recounting). Deciding *when* a transition
//! happens belongs to [`crate::orchestrator`].
//!
//! Every enum serializes as a stable lowercase token and every timestamp as
//! RFC 3339. Optional fields are written as `null` and missing fields read
//! back as `None`, so an unset time can never be confused with a real one.
//!
//! ## Legacy records
//!
//! Records written by the older Python tool load as well: its field names
//! (`task_type`, `input_path`, `files`, `file_path`, …) are accepted as
//! aliases, and its offset-less ISO 8601 timestamps are read as UTC. Saving
//! such a record rewrites it in the current layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Open key → value map used for item metadata and per-task overrides.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// Which transformation a task performs.
///
/// The kind picks both the scan rule ([`crate::scan`]) and the output
/// layout ([`crate::paths`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// One item per PDF; output is a directory of page images.
    #[serde(alias = "pdf2image")]
    DocumentToImages,
    /// One item per directory of page images; output is a Markdown file.
    #[serde(alias = "img2markdown")]
    ImagesToText,
    /// One item per PDF; output is a Markdown file (both stages fused).
    #[serde(alias = "full_pipeline")]
    FullPipeline,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::DocumentToImages,
        TaskKind::ImagesToText,
        TaskKind::FullPipeline,
    ];

    /// The stable token used in task records.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::DocumentToImages => "document-to-images",
            TaskKind::ImagesToText => "images-to-text",
            TaskKind::FullPipeline => "full-pipeline",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a whole task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Scanned and persisted, never started.
    #[default]
    Created,
    /// A run is in progress (or the process died mid-run).
    Running,
    /// Interrupted; resumable.
    Paused,
    /// Every item was visited.
    Completed,
    /// A task-level fault aborted the run.
    Failed,
    /// Cancelled on request.
    Cancelled,
}

impl TaskStatus {
    /// Whether a run may be (re)started from this status.
    pub fn can_start(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Whether a cancellation request is legal from this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single work item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    /// Returns true if the item is settled for this run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one file (or one directory of page images).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Input path of the item; also its key in [`TaskRecord::items`].
    #[serde(alias = "file_path")]
    pub reference: String,

    #[serde(default)]
    pub status: ItemStatus,

    #[serde(default, deserialize_with = "timestamp::optional")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "timestamp::optional")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error_message: Option<String>,

    /// Where the output was written. Set only on success.
    #[serde(default, alias = "output_path")]
    pub output_reference: Option<String>,

    #[serde(default)]
    pub metadata: ValueMap,
}

impl ItemRecord {
    /// A fresh `pending` item.
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            status: ItemStatus::Pending,
            start_time: None,
            end_time: None,
            error_message: None,
            output_reference: None,
            metadata: ValueMap::new(),
        }
    }

    /// Enter `processing`, dropping whatever an earlier attempt left behind.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.status = ItemStatus::Processing;
        self.start_time = Some(now);
        self.end_time = None;
        self.error_message = None;
        self.output_reference = None;
    }

    pub fn complete(&mut self, output_reference: impl Into<String>, now: DateTime<Utc>) {
        self.status = ItemStatus::Completed;
        self.output_reference = Some(output_reference.into());
        self.end_time = Some(now);
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = ItemStatus::Failed;
        self.error_message = Some(message.into());
        self.end_time = Some(now);
    }
}

/// The complete, persisted state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,

    #[serde(alias = "task_type")]
    pub kind: TaskKind,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(deserialize_with = "timestamp::required")]
    pub created_time: DateTime<Utc>,

    #[serde(default, deserialize_with = "timestamp::optional")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "timestamp::optional")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(alias = "input_path")]
    pub input_root: PathBuf,

    #[serde(alias = "output_path")]
    pub output_root: PathBuf,

    #[serde(default, alias = "total_files")]
    pub total_items: usize,

    #[serde(default, alias = "processed_files")]
    pub processed_count: usize,

    #[serde(default, alias = "failed_files")]
    pub failed_count: usize,

    /// Keyed by [`ItemRecord::reference`]; ordered, so iteration is stable.
    #[serde(default, alias = "files")]
    pub items: BTreeMap<String, ItemRecord>,

    /// Per-task configuration overrides (see
    /// [`crate::config::BatchConfig::with_overrides`]).
    #[serde(default)]
    pub config: ValueMap,

    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskRecord {
    /// Build a `created` task over an already-scanned item set.
    pub fn new(
        kind: TaskKind,
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        items: BTreeMap<String, ItemRecord>,
        config: ValueMap,
    ) -> Self {
        let mut record = Self {
            task_id: Uuid::new_v4().to_string(),
            kind,
            status: TaskStatus::Created,
            created_time: Utc::now(),
            start_time: None,
            end_time: None,
            input_root: input_root.into(),
            output_root: output_root.into(),
            total_items: items.len(),
            processed_count: 0,
            failed_count: 0,
            items,
            config,
            error_message: None,
        };
        record.recount();
        record
    }

    /// Recompute `processed_count` and `failed_count` from item statuses.
    pub fn recount(&mut self) {
        let (processed, failed) =
            self.items
                .values()
                .fold((0, 0), |(p, f), item| match item.status {
                    ItemStatus::Completed => (p + 1, f),
                    ItemStatus::Failed => (p, f + 1),
                    _ => (p, f),
                });
        self.processed_count = processed;
        self.failed_count = failed;
    }

    /// Fraction of items completed, `0.0` for an empty task.
    pub fn progress(&self) -> f64 {
        if self.total_items == 0 {
            0.0
        } else {
            self.processed_count as f64 / self.total_items as f64
        }
    }

    /// Returns true when every item has settled.
    pub fn all_items_settled(&self) -> bool {
        self.items.values().all(|i| i.status.is_terminal())
    }

    /// Items whose last attempt failed, in iteration order.
    pub fn failed_items(&self) -> impl Iterator<Item = &ItemRecord> {
        self.items
            .values()
            .filter(|i| i.status == ItemStatus::Failed)
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id.clone(),
            kind: self.kind,
            status: self.status,
            total_items: self.total_items,
            processed_count: self.processed_count,
            failed_count: self.failed_count,
            progress: self.progress(),
            created_time: self.created_time,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Timestamp readers used by the record types.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    /// RFC 3339, or ISO 8601 without an offset (taken as UTC).
    pub(crate) fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        match DateTime::parse_from_rfc3339(s) {
            Ok(t) => Ok(t.with_timezone(&Utc)),
            Err(e) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
                .map_err(|_| e),
        }
    }

    pub(crate) fn required<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(d)?;
        parse(&s).map_err(D::Error::custom)
    }

    pub(crate) fn optional<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| parse(&s).map_err(D::Error::custom))
            .transpose()
    }
}

/// The listing / status view of a task, without its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub total_items: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    /// `processed_count / total_items`, or `0.0` with no items.
    pub progress: f64,
    pub created_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}
