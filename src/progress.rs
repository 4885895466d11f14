//! Progress-callback trait for per-item run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::orchestrator::RunOptions::progress`] to receive events as the
//! orchestrator works through a task. The library itself prints nothing;
//! the `pdf2md-batch` binary renders these events as a progress bar.
//!
//! Items are processed one at a time, so callbacks are never invoked
//! concurrently for the same run, but implementations must still be
//! `Send + Sync` because the run may hop between runtime threads.

use crate::orchestrator::RunReport;
use std::sync::Arc;

/// Called by the orchestrator as it visits each item.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is 1-based.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after the task enters `running`.
    ///
    /// # Arguments
    /// * `total_items`: items in the task
    /// * `already_done`: items that will be skipped because they completed
    ///   in an earlier run (zero when resume is disabled)
    fn on_run_start(&self, task_id: &str, total_items: usize, already_done: usize) {
        let _ = (task_id, total_items, already_done);
    }

    /// Called just before the processor is invoked for an item.
    fn on_item_start(&self, reference: &str, index: usize, total: usize) {
        let _ = (reference, index, total);
    }

    /// Called when an item completes.
    fn on_item_complete(&self, reference: &str, index: usize, total: usize) {
        let _ = (reference, index, total);
    }

    /// Called when an item fails; `error` is what gets stored on the item.
    fn on_item_error(&self, reference: &str, index: usize, total: usize, error: &str) {
        let _ = (reference, index, total, error);
    }

    /// Called for items skipped because they already completed.
    fn on_item_skipped(&self, reference: &str, index: usize, total: usize) {
        let _ = (reference, index, total);
    }

    /// Called once before `run_task` returns successfully.
    fn on_run_complete(&self, report: &RunReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::orchestrator::RunOptions`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        skipped: AtomicUsize,
    }

    impl RunProgressCallback for TrackingCallback {
        fn on_item_start(&self, _reference: &str, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _reference: &str, _index: usize, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _reference: &str, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_skipped(&self, _reference: &str, _index: usize, _total: usize) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn report() -> RunReport {
        RunReport {
            task_id: "t".into(),
            status: TaskStatus::Completed,
            total_items: 3,
            processed_count: 2,
            failed_count: 1,
            attempted: 3,
            skipped: 0,
            error_message: None,
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start("t", 3, 0);
        cb.on_item_start("a", 1, 3);
        cb.on_item_complete("a", 1, 3);
        cb.on_item_error("b", 2, 3, "renderer timeout");
        cb.on_item_skipped("c", 3, 3);
        cb.on_run_complete(&report());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_item_start("a", 1, 3);
        tracker.on_item_complete("a", 1, 3);
        tracker.on_item_start("b", 2, 3);
        tracker.on_item_error("b", 2, 3, "boom");
        tracker.on_item_skipped("c", 3, 3);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start("t", 10, 4);
        cb.on_run_complete(&report());
    }
}
