//! Error types for the edgequake-batch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`TaskError`] is **fatal** for the operation that raised it: the input
//!   root cannot be scanned, the task record cannot be read or written, the
//!   task id is unknown. Returned as `Err(TaskError)` from the
//!   [`crate::orchestrator::Orchestrator`] entry points. A persistence fault
//!   in the middle of a run also marks the task `failed`.
//!
//! * [`ItemError`] is **non-fatal**: a single work item failed (render glitch,
//!   VLM outage, processor panic) but the task keeps going. Recorded into
//!   [`crate::model::ItemRecord::error_message`] and never propagated.
//!
//! Inside the bundled processors, [`ProcessorError`] carries the detail before
//! it is flattened into an `ItemError`, and [`PageError`] marks a single page
//! that was dropped from a transcription.
//!
//! Interruption and cancellation are not errors at all; they surface as the
//! task's `paused` / `cancelled` status in the [`crate::orchestrator::RunReport`].

use crate::model::TaskStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-batch library.
#[derive(Debug, Error)]
pub enum TaskError {
    // ── Scanning ──────────────────────────────────────────────────────────
    /// The input root is missing, not a directory, or unreadable.
    #[error("Cannot scan input '{path}': {reason}\nCheck the path exists and is a readable directory.")]
    Scan { path: PathBuf, reason: String },

    // ── Persistence ───────────────────────────────────────────────────────
    /// A task record could not be read, parsed, or written.
    #[error("Task store error at '{path}': {reason}")]
    Persistence { path: PathBuf, reason: String },

    // ── Lookup / state ────────────────────────────────────────────────────
    /// No record exists for the given task id.
    #[error("Task '{task_id}' not found\nRun `pdf2md-batch list` to see known tasks.")]
    NotFound { task_id: String },

    /// The requested action is not legal from the task's current status.
    #[error("Cannot {action} task '{task_id}' while it is {status}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        action: &'static str,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation or config-file parsing failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        TaskError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn scan(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        TaskError::Scan {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A non-fatal error for a single work item.
///
/// The `Display` output is what ends up in the item's `error_message`, so
/// [`ItemError::Failed`] renders the processor's message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    /// The processor reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The processor panicked while handling the item.
    #[error("processor panicked: {0}")]
    Panicked(String),
}

impl From<String> for ItemError {
    fn from(message: String) -> Self {
        ItemError::Failed(message)
    }
}

impl From<&str> for ItemError {
    fn from(message: &str) -> Self {
        ItemError::Failed(message.to_string())
    }
}

/// A single page could not be transcribed. The page is dropped from the
/// output; the item only fails if every page does.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// The page image could not be read or encoded.
    #[error("Page {page}: cannot encode image: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The VLM call failed after all retries.
    #[error("Page {page}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed { page: usize, retries: u32, detail: String },
}

/// Errors raised inside the bundled processors before they are flattened
/// into an [`ItemError`].
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// The image directory holds no page images.
    #[error("No page images found in '{path}'")]
    NoImages { path: PathBuf },

    /// Every page of the item failed transcription.
    #[error("All {total} pages failed transcription. First error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not create or write an output file.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Blocking worker panicked or was cancelled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ProcessorError> for ItemError {
    fn from(e: ProcessorError) -> Self {
        ItemError::Failed(e.to_string())
    }
}
