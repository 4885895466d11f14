//! The task orchestrator: create, run, resume, inspect and cancel tasks.
//!
//! ## Run algorithm
//!
//! ```text
//! load record ──▶ status = running ──▶ save ──▶ spawn ticker
//!     │
//!     ▼  for each item, in key order
//! interrupt requested?  ──yes──▶ paused
//! cancelled on disk?    ──yes──▶ cancelled
//! resume && completed?  ──yes──▶ skip
//!     │
//!     ▼
//! item = processing ──▶ checkpoint ──▶ processor(input, output)
//!     │                                       │
//!     ▼                                       ▼
//! item = completed | failed ◀─────────────────┘
//!     │
//!     ▼
//! checkpoint ──▶ next item
//!     │
//!     ▼  loop finished
//! stop ticker ──▶ completed ──▶ save
//! ```
//!
//! ## Why a shared, locked record?
//!
//! The foreground loop and the [`CheckpointTicker`] both persist the same
//! record. Sharing it behind one `tokio::sync::Mutex` means each write is a
//! consistent snapshot, and the processor itself is always called with the
//! lock released so a slow item never blocks a checkpoint.
//!
//! ## Interruption and cancellation
//!
//! Neither aborts the processor call in flight. An interrupt (the
//! [`RunOptions::interrupt`] token) pauses the task once the current item
//! settles. A cancellation written by another process is picked up by the
//! next checkpoint and stops the loop before the next item; the record stays
//! `cancelled`.

use crate::checkpoint::{adopt_external_cancel, checkpoint, CheckpointTicker, SharedRecord};
use crate::config::BatchConfig;
use crate::error::{ItemError, TaskError};
use crate::model::{ItemRecord, ItemStatus, TaskKind, TaskRecord, TaskStatus, TaskSummary, ValueMap};
use crate::paths::map_output;
use crate::processor::ItemProcessor;
use crate::progress::ProgressCallback;
use crate::scan::scan;
use crate::store::TaskStore;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-run options for [`Orchestrator::run_task`].
#[derive(Clone)]
pub struct RunOptions {
    /// Skip items that completed in an earlier run. Default: `true`.
    ///
    /// With `false` every item is processed again, overwriting its output.
    pub resume: bool,

    /// Cancel this token to pause the run after the current item.
    pub interrupt: CancellationToken,

    /// Optional per-item progress events.
    pub progress: Option<ProgressCallback>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resume: true,
            interrupt: CancellationToken::new(),
            progress: None,
        }
    }
}

impl RunOptions {
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = token;
        self
    }

    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

/// Outcome of a [`Orchestrator::run_task`] call that did not hit a
/// task-level fault.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub task_id: String,
    /// `completed`, `paused` or `cancelled`.
    pub status: TaskStatus,
    pub total_items: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    /// Processor invocations made by this run.
    pub attempted: usize,
    /// Items skipped because an earlier run completed them.
    pub skipped: usize,
    pub error_message: Option<String>,
}

impl RunReport {
    /// Returns true if the task finished and no item failed.
    pub fn is_clean(&self) -> bool {
        self.status == TaskStatus::Completed && self.failed_count == 0
    }
}

/// Why the item loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Finished,
    Interrupted,
    Cancelled,
}

#[derive(Debug, Default)]
struct RunStats {
    attempted: usize,
    skipped: usize,
}

/// Creates and drives batch tasks persisted in a [`TaskStore`].
///
/// Cheap to construct; holds no state besides its config. Several
/// orchestrators may share a task directory, but only one should run a given
/// task at a time.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: BatchConfig,
    store: TaskStore,
}

impl Orchestrator {
    pub fn new(config: BatchConfig) -> Self {
        let store = TaskStore::from_config(&config);
        Self { config, store }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    // ── Creation ──────────────────────────────────────────────────────────

    /// Scan `input_root` and persist a new `created` task.
    ///
    /// `overrides` are stored on the task and layered over the base config
    /// when the task runs (see [`Orchestrator::task_config`]). They are
    /// validated here so a bad value fails at creation, not mid-run.
    ///
    /// # Errors
    /// [`TaskError::Scan`] for a bad input root, [`TaskError::InvalidConfig`]
    /// for bad overrides, [`TaskError::Persistence`] if the record cannot be
    /// written. Nothing is persisted on error.
    pub async fn create_task(
        &self,
        kind: TaskKind,
        input_root: impl AsRef<Path>,
        output_root: impl AsRef<Path>,
        overrides: ValueMap,
    ) -> Result<String, TaskError> {
        self.config.with_overrides(&overrides)?;

        let input_root = input_root.as_ref().to_path_buf();
        let root = input_root.clone();
        let items = tokio::task::spawn_blocking(move || scan(kind, &root))
            .await
            .map_err(|e| TaskError::Internal(format!("scan task panicked: {e}")))??;

        let record = TaskRecord::new(kind, input_root, output_root.as_ref(), items, overrides);
        self.store.create(&record).await?;

        info!(
            "Created {} task {} with {} items",
            kind, record.task_id, record.total_items
        );
        Ok(record.task_id)
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// The full persisted record of a task.
    pub async fn load_task(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.store.load(task_id).await
    }

    pub async fn get_status(&self, task_id: &str) -> Result<TaskSummary, TaskError> {
        Ok(self.store.load(task_id).await?.summary())
    }

    /// Summaries of all tasks, newest first, optionally of one kind only.
    pub async fn list_tasks(&self, kind: Option<TaskKind>) -> Result<Vec<TaskSummary>, TaskError> {
        let mut tasks = self.store.list().await?;
        if let Some(kind) = kind {
            tasks.retain(|t| t.kind == kind);
        }
        Ok(tasks)
    }

    /// Items whose last attempt failed, with their error messages.
    pub async fn failed_items(&self, task_id: &str) -> Result<Vec<ItemRecord>, TaskError> {
        let record = self.store.load(task_id).await?;
        Ok(record.failed_items().cloned().collect())
    }

    /// The base config with the task's stored overrides applied.
    pub async fn task_config(&self, task_id: &str) -> Result<BatchConfig, TaskError> {
        let record = self.store.load(task_id).await?;
        self.config.with_overrides(&record.config)
    }

    // ── Cancellation ──────────────────────────────────────────────────────

    /// Mark a task `cancelled`.
    ///
    /// Legal from `created`, `running` and `paused`. A run in progress (in
    /// this or another process) notices at its next checkpoint and stops
    /// after the item in flight.
    ///
    /// The cancel is a plain write of the task file. If the run's periodic
    /// checkpoint reads the file just before this write and saves just after
    /// it, the running snapshot overwrites the cancel and the run carries
    /// on. `status` shows `running` again in that case; cancel again.
    pub async fn cancel_task(&self, task_id: &str) -> Result<TaskSummary, TaskError> {
        let mut record = self.store.load(task_id).await?;
        if !record.status.can_cancel() {
            return Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                status: record.status,
                action: "cancel",
            });
        }

        record.status = TaskStatus::Cancelled;
        record.end_time = Some(Utc::now());
        self.store.save(&record).await?;
        info!("Cancelled task {}", task_id);
        Ok(record.summary())
    }

    // ── Running ───────────────────────────────────────────────────────────

    /// Run (or resume) a task to completion, interruption or cancellation.
    ///
    /// Item failures, including processor panics, are recorded on the item
    /// and never abort the run. A run may start from any status except
    /// `cancelled`; a task left `running` by a crashed process is recovered,
    /// and its `processing` items are treated as pending.
    ///
    /// # Errors
    /// * [`TaskError::NotFound`] for an unknown id.
    /// * [`TaskError::InvalidState`] if the task is cancelled.
    /// * [`TaskError::Persistence`] if a checkpoint fails mid-run. The task
    ///   is then marked `failed` (best effort) and the run stops.
    pub async fn run_task(
        &self,
        task_id: &str,
        processor: &dyn ItemProcessor,
        options: RunOptions,
    ) -> Result<RunReport, TaskError> {
        let mut record = self.store.load(task_id).await?;
        if !record.status.can_start() {
            return Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                status: record.status,
                action: "run",
            });
        }
        if record.status == TaskStatus::Running {
            warn!(
                "Task {} is marked running; recovering from an earlier run that did not finish",
                task_id
            );
        }

        record.status = TaskStatus::Running;
        if record.start_time.is_none() {
            record.start_time = Some(Utc::now());
        }
        record.end_time = None;
        record.error_message = None;
        record.recount();
        self.store.save(&record).await?;

        info!(
            "Running {} task {} ({} items, resume={})",
            record.kind, task_id, record.total_items, options.resume
        );

        if let Some(cb) = &options.progress {
            let already_done = if options.resume {
                record
                    .items
                    .values()
                    .filter(|i| i.status == ItemStatus::Completed)
                    .count()
            } else {
                0
            };
            cb.on_run_start(task_id, record.total_items, already_done);
        }

        let shared: SharedRecord = Arc::new(Mutex::new(record));
        let ticker = CheckpointTicker::spawn(
            self.store.clone(),
            Arc::clone(&shared),
            self.config.checkpoint_interval(),
        );

        let mut stats = RunStats::default();
        let outcome = self.drive(&shared, processor, &options, &mut stats).await;
        ticker.stop().await;

        let report = self.finish(&shared, outcome, stats).await?;
        if let Some(cb) = &options.progress {
            cb.on_run_complete(&report);
        }
        Ok(report)
    }

    /// Visit every item once. Returns early on interrupt, cancellation or a
    /// checkpoint failure.
    async fn drive(
        &self,
        shared: &SharedRecord,
        processor: &dyn ItemProcessor,
        options: &RunOptions,
        stats: &mut RunStats,
    ) -> Result<LoopEnd, TaskError> {
        let (kind, input_root, output_root, references) = {
            let r = shared.lock().await;
            (
                r.kind,
                r.input_root.clone(),
                r.output_root.clone(),
                r.items.keys().cloned().collect::<Vec<_>>(),
            )
        };
        let total = references.len();

        for (i, reference) in references.iter().enumerate() {
            let index = i + 1;

            if options.interrupt.is_cancelled() {
                info!("Interrupt requested; pausing before item {}/{}", index, total);
                return Ok(LoopEnd::Interrupted);
            }

            let before = {
                let mut r = shared.lock().await;
                if r.status == TaskStatus::Cancelled {
                    return Ok(LoopEnd::Cancelled);
                }
                let skip = options.resume
                    && r.items.get(reference).map(|it| it.status) == Some(ItemStatus::Completed);
                if skip {
                    debug!("Skipping completed item {}", reference);
                    stats.skipped += 1;
                    if let Some(cb) = &options.progress {
                        cb.on_item_skipped(reference, index, total);
                    }
                    continue;
                }
                let before = r.items.get(reference).cloned();
                if let Some(item) = r.items.get_mut(reference) {
                    item.begin(Utc::now());
                }
                r.recount();
                before
            };
            checkpoint(&self.store, shared).await?;

            // The checkpoint may have picked up a cancel written on disk.
            {
                let mut r = shared.lock().await;
                if r.status == TaskStatus::Cancelled {
                    if let Some(before) = before {
                        r.items.insert(reference.clone(), before);
                    }
                    r.recount();
                    info!("Task cancelled; item {} left untouched", reference);
                    return Ok(LoopEnd::Cancelled);
                }
            }

            let output = map_output(reference, &input_root, &output_root, kind);
            debug!(
                "Processing item {}/{}: {} → {}",
                index,
                total,
                reference,
                output.display()
            );
            if let Some(cb) = &options.progress {
                cb.on_item_start(reference, index, total);
            }

            let result = invoke(processor, Path::new(reference), &output).await;
            stats.attempted += 1;

            {
                let mut r = shared.lock().await;
                let now = Utc::now();
                if let Some(item) = r.items.get_mut(reference) {
                    match &result {
                        Ok(()) => item.complete(output.to_string_lossy(), now),
                        Err(e) => item.fail(e.to_string(), now),
                    }
                }
                r.recount();
            }
            checkpoint(&self.store, shared).await?;

            match &result {
                Ok(()) => {
                    if let Some(cb) = &options.progress {
                        cb.on_item_complete(reference, index, total);
                    }
                }
                Err(e) => {
                    warn!("Item {} failed: {}", reference, e);
                    if let Some(cb) = &options.progress {
                        cb.on_item_error(reference, index, total, &e.to_string());
                    }
                }
            }
        }

        Ok(LoopEnd::Finished)
    }

    /// Settle the final status and write it. Runs with the ticker stopped.
    async fn finish(
        &self,
        shared: &SharedRecord,
        outcome: Result<LoopEnd, TaskError>,
        stats: RunStats,
    ) -> Result<RunReport, TaskError> {
        let mut record = shared.lock().await;

        let end = match outcome {
            Ok(end) => end,
            Err(e) => {
                error!("Task {} failed: {}", record.task_id, e);
                record.status = TaskStatus::Failed;
                record.error_message = Some(e.to_string());
                record.end_time = Some(Utc::now());
                if let Err(save_err) = self.store.save(&record).await {
                    warn!(
                        "Could not persist failed status of task {}: {}",
                        record.task_id, save_err
                    );
                }
                return Err(e);
            }
        };

        adopt_external_cancel(&self.store, &mut record).await;
        if record.status == TaskStatus::Running {
            match end {
                LoopEnd::Finished if record.all_items_settled() => {
                    record.status = TaskStatus::Completed;
                    record.end_time = Some(Utc::now());
                }
                LoopEnd::Finished => {
                    warn!(
                        "Task {} finished its pass with unsettled items; pausing",
                        record.task_id
                    );
                    record.status = TaskStatus::Paused;
                }
                LoopEnd::Interrupted => record.status = TaskStatus::Paused,
                LoopEnd::Cancelled => {}
            }
        }
        record.recount();

        if let Err(e) = self.store.save(&record).await {
            error!("Task {} failed: {}", record.task_id, e);
            record.status = TaskStatus::Failed;
            record.error_message = Some(e.to_string());
            return Err(e);
        }

        info!(
            "Task {} {}: {}/{} completed, {} failed ({} attempted, {} skipped)",
            record.task_id,
            record.status,
            record.processed_count,
            record.total_items,
            record.failed_count,
            stats.attempted,
            stats.skipped
        );

        Ok(RunReport {
            task_id: record.task_id.clone(),
            status: record.status,
            total_items: record.total_items,
            processed_count: record.processed_count,
            failed_count: record.failed_count,
            attempted: stats.attempted,
            skipped: stats.skipped,
            error_message: record.error_message.clone(),
        })
    }
}

/// Call the processor, turning a panic into an item failure.
async fn invoke(processor: &dyn ItemProcessor, input: &Path, output: &Path) -> Result<(), ItemError> {
    match AssertUnwindSafe(processor.process(input, output))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(ItemError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
