//! # edgequake-batch
//!
//! Resumable batch conversion of document trees: PDFs → page images →
//! Markdown, tracked as durable tasks that survive crashes and restarts.
//!
//! ## Why tasks?
//!
//! Converting a few thousand scanned PDFs with a vision model takes hours,
//! costs money per page, and fails in small ways all the time: a corrupt file
//! here, a 503 from the API there, a laptop lid closed halfway through. A
//! task records every work item and its outcome in a JSON file that is
//! rewritten atomically as the run progresses. Re-running the task skips
//! what already succeeded, retries what failed, and never loses more than
//! the item that was in flight.
//!
//! ## Architecture
//!
//! ```text
//! input root ──▶ scan ──▶ TaskRecord ──▶ TaskStore (tasks/task_<id>.json)
//!                               │
//!                               ▼
//!                          Orchestrator ──▶ ItemProcessor(input, output)
//!                               │              ├─ RenderProcessor
//!                               │              ├─ TranscribeProcessor
//!                               ▼              └─ PipelineProcessor
//!                       CheckpointTicker
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_batch::{processor_for, BatchConfig, Orchestrator, RunOptions, TaskKind, ValueMap};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(BatchConfig::default());
//!     let task_id = orchestrator
//!         .create_task(TaskKind::DocumentToImages, "pdfs", "images", ValueMap::new())
//!         .await?;
//!
//!     let config = orchestrator.task_config(&task_id).await?;
//!     let processor = processor_for(TaskKind::DocumentToImages, &config)?;
//!     let report = orchestrator
//!         .run_task(&task_id, processor.as_ref(), RunOptions::default())
//!         .await?;
//!     eprintln!("{}: {}/{} done", report.status, report.processed_count, report.total_items);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md-batch` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-batch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod pipeline;
pub mod processor;
pub mod processors;
pub mod progress;
pub mod prompts;
pub mod scan;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    BatchConfig, BatchConfigBuilder, PageImageFormat, PipelineSettings, RenderSettings,
    TranscribeSettings,
};
pub use error::{ItemError, PageError, ProcessorError, TaskError};
pub use model::{ItemRecord, ItemStatus, TaskKind, TaskRecord, TaskStatus, TaskSummary, ValueMap};
pub use orchestrator::{Orchestrator, RunOptions, RunReport};
pub use paths::map_output;
pub use processor::{FnProcessor, ItemProcessor};
pub use processors::{processor_for, PipelineProcessor, RenderProcessor, TranscribeProcessor};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use scan::scan;
pub use store::TaskStore;

/// Re-exported so embedders can hand a token to [`RunOptions::interrupt`]
/// without depending on `tokio-util` themselves.
pub use tokio_util::sync::CancellationToken;
