//! Checkpointing of the in-memory task record.
//!
//! Two writers persist the record while a run is in progress: the
//! foreground loop (twice per item) and the [`CheckpointTicker`] (on a
//! timer, so a slow item does not leave the file stale). Both go through
//! [`checkpoint`], which holds the record's mutex across
//! "snapshot → serialise → atomic write". Neither can observe the other
//! mid-mutation, and writes never interleave.
//!
//! Every checkpoint also looks at the status already on disk. If another
//! process cancelled the task, the in-memory record adopts `cancelled`
//! instead of overwriting it, and the foreground loop stops before its next
//! item.

use crate::error::TaskError;
use crate::model::{TaskRecord, TaskStatus};
use crate::store::TaskStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The record shared between the foreground loop and the ticker.
pub type SharedRecord = Arc<Mutex<TaskRecord>>;

/// Persist the current snapshot of `shared`.
pub async fn checkpoint(store: &TaskStore, shared: &SharedRecord) -> Result<(), TaskError> {
    let mut record = shared.lock().await;
    adopt_external_cancel(store, &mut record).await;
    store.save(&record).await
}

/// Switch a running record to `cancelled` if the persisted copy says so.
pub(crate) async fn adopt_external_cancel(store: &TaskStore, record: &mut TaskRecord) {
    if record.status != TaskStatus::Running {
        return;
    }
    match store.load_status(&record.task_id).await {
        Ok(probe) if probe.status == TaskStatus::Cancelled => {
            info!("Task {} was cancelled externally", record.task_id);
            record.status = TaskStatus::Cancelled;
            record.end_time = probe.end_time.or_else(|| Some(Utc::now()));
        }
        Ok(_) => {}
        Err(e) => debug!("Status probe for task {} failed: {}", record.task_id, e),
    }
}

/// Background task persisting a [`SharedRecord`] on a fixed interval.
///
/// Must be stopped with [`CheckpointTicker::stop`], which waits for an
/// in-flight write to finish.
pub struct CheckpointTicker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl CheckpointTicker {
    pub fn spawn(store: TaskStore, shared: SharedRecord, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the run just saved.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match checkpoint(&store, &shared).await {
                            Ok(()) => debug!("Periodic checkpoint written"),
                            Err(e) => warn!("Periodic checkpoint failed: {}", e),
                        }
                    }
                }
            }
        });

        Self { stop, handle }
    }

    /// Stop ticking and wait until the last write has finished.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            warn!("Checkpoint ticker ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemRecord, TaskKind, ValueMap};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn running_record() -> TaskRecord {
        let items: BTreeMap<_, _> = ["a", "b"]
            .iter()
            .map(|r| (r.to_string(), ItemRecord::new(*r)))
            .collect();
        let mut r = TaskRecord::new(TaskKind::ImagesToText, "/in", "/out", items, ValueMap::new());
        r.status = TaskStatus::Running;
        r
    }

    #[tokio::test]
    async fn ticker_persists_in_memory_changes() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path(), "task_");
        let record = running_record();
        let id = record.task_id.clone();
        store.save(&record).await.unwrap();

        let shared: SharedRecord = Arc::new(Mutex::new(record));
        let ticker = CheckpointTicker::spawn(store.clone(), Arc::clone(&shared), Duration::from_millis(10));

        {
            let mut r = shared.lock().await;
            r.items.get_mut("a").unwrap().begin(Utc::now());
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        ticker.stop().await;

        let on_disk = store.load(&id).await.unwrap();
        assert_eq!(on_disk.items["a"].status, crate::model::ItemStatus::Processing);
    }

    #[tokio::test]
    async fn stop_leaves_no_write_behind() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path(), "task_");
        let record = running_record();
        let id = record.task_id.clone();
        store.save(&record).await.unwrap();

        let shared: SharedRecord = Arc::new(Mutex::new(record));
        let ticker = CheckpointTicker::spawn(store.clone(), Arc::clone(&shared), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        ticker.stop().await;

        // Mutate after stop; nothing may persist it.
        shared.lock().await.error_message = Some("after stop".into());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.load(&id).await.unwrap().error_message.is_none());
    }

    #[tokio::test]
    async fn checkpoint_adopts_external_cancel() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path(), "task_");
        let record = running_record();

        let mut cancelled = record.clone();
        cancelled.status = TaskStatus::Cancelled;
        cancelled.end_time = Some(Utc::now());
        store.save(&cancelled).await.unwrap();

        let shared: SharedRecord = Arc::new(Mutex::new(record));
        checkpoint(&store, &shared).await.unwrap();

        assert_eq!(shared.lock().await.status, TaskStatus::Cancelled);
        let on_disk = store.load(&cancelled.task_id).await.unwrap();
        assert_eq!(on_disk.status, TaskStatus::Cancelled);
        assert_eq!(on_disk.end_time, cancelled.end_time);
    }
}
