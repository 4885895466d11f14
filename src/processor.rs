//! The per-item processing contract.
//!
//! The orchestrator knows nothing about PDFs or vision models. Each task kind
//! binds one [`ItemProcessor`] with the shape `(input, output) -> Result`,
//! supplied by the caller at run time. The bundled implementations live in
//! [`crate::processors`]; tests and embedders can pass their own, including
//! plain async closures through [`FnProcessor`].
//!
//! A processor may be called again for an item it already handled (resume
//! after a failure, `--no-resume` re-runs), so it must overwrite rather than
//! append to earlier output.

use crate::error::ItemError;
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Transforms one work item into its output.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Process the item at `input`, writing to `output`.
    ///
    /// Return `Err` to mark the item failed; the message is stored on the
    /// item and the task moves on. Panics are caught by the orchestrator and
    /// recorded the same way.
    async fn process(&self, input: &Path, output: &Path) -> Result<(), ItemError>;
}

#[async_trait]
impl<P: ItemProcessor + ?Sized> ItemProcessor for Arc<P> {
    async fn process(&self, input: &Path, output: &Path) -> Result<(), ItemError> {
        (**self).process(input, output).await
    }
}

/// Adapts an async closure into an [`ItemProcessor`].
///
/// ```rust
/// use edgequake_batch::{FnProcessor, ItemError};
///
/// let copy = FnProcessor::new(|input, output| async move {
///     tokio::fs::copy(&input, &output)
///         .await
///         .map(|_| ())
///         .map_err(|e| ItemError::Failed(e.to_string()))
/// });
/// # let _ = copy;
/// ```
pub struct FnProcessor<F> {
    f: F,
}

impl<F, Fut> FnProcessor<F>
where
    F: Fn(PathBuf, PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ItemError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ItemProcessor for FnProcessor<F>
where
    F: Fn(PathBuf, PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ItemError>> + Send,
{
    async fn process(&self, input: &Path, output: &Path) -> Result<(), ItemError> {
        (self.f)(input.to_path_buf(), output.to_path_buf()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_processor_forwards_paths() {
        let p = FnProcessor::new(|input: PathBuf, output: PathBuf| async move {
            if input.ends_with("bad.pdf") {
                Err(ItemError::from(format!("cannot render {}", input.display())))
            } else {
                assert!(output.ends_with("good"));
                Ok(())
            }
        });

        assert!(p.process(Path::new("/in/good.pdf"), Path::new("/out/good")).await.is_ok());
        let err = p
            .process(Path::new("/in/bad.pdf"), Path::new("/out/bad"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot render /in/bad.pdf");
    }

    #[tokio::test]
    async fn arc_dyn_processor_works() {
        let p: Arc<dyn ItemProcessor> = Arc::new(FnProcessor::new(|_, _| async { Ok::<(), ItemError>(()) }));
        assert!(p.process(Path::new("a"), Path::new("b")).await.is_ok());
    }
}
