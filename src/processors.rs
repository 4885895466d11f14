//! The bundled [`ItemProcessor`]s, one per [`TaskKind`].
//!
//! | Kind | Processor | Input → output |
//! |------|-----------|----------------|
//! | `document-to-images` | [`RenderProcessor`] | PDF → directory of `page_NNN.jpg` |
//! | `images-to-text` | [`TranscribeProcessor`] | image directory → `.md` file |
//! | `full-pipeline` | [`PipelineProcessor`] | PDF → staging images → `.md` file |
//!
//! Use [`processor_for`] to get the right one for a task.

use crate::config::{BatchConfig, RenderSettings};
use crate::error::{ItemError, PageError, ProcessorError};
use crate::model::TaskKind;
use crate::paths::{sanitize_segment, short_hash};
use crate::pipeline::encode::encode_image_file;
use crate::pipeline::llm::{PageTranscriber, VlmTranscriber};
use crate::pipeline::postprocess::{clean_page, join_pages};
use crate::pipeline::render::render_document;
use crate::processor::ItemProcessor;
use crate::prompts::BLANK_PAGE_MARKER;
use crate::scan::{has_extension, IMAGE_EXTENSIONS};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Build the processor for `kind` from `config`.
///
/// # Errors
/// [`ProcessorError::ProviderNotConfigured`] if the kind needs a VLM and no
/// provider can be resolved.
pub fn processor_for(
    kind: TaskKind,
    config: &BatchConfig,
) -> Result<Arc<dyn ItemProcessor>, ProcessorError> {
    Ok(match kind {
        TaskKind::DocumentToImages => Arc::new(RenderProcessor::new(config.render.clone())),
        TaskKind::ImagesToText => Arc::new(TranscribeProcessor::from_config(config)?),
        TaskKind::FullPipeline => Arc::new(PipelineProcessor::new(
            RenderProcessor::new(config.render.clone()),
            TranscribeProcessor::from_config(config)?,
            config.pipeline.staging_dir.clone(),
        )),
    })
}

// ── document-to-images ───────────────────────────────────────────────────────

/// Renders every page of a PDF into the output directory.
#[derive(Debug, Clone)]
pub struct RenderProcessor {
    settings: RenderSettings,
}

impl RenderProcessor {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    async fn render(&self, pdf: &Path, out_dir: &Path) -> Result<usize, ProcessorError> {
        let pages = render_document(pdf, out_dir, &self.settings).await?;
        info!("Rendered {} pages of {}", pages, pdf.display());
        Ok(pages)
    }
}

#[async_trait]
impl ItemProcessor for RenderProcessor {
    async fn process(&self, input: &Path, output: &Path) -> Result<(), ItemError> {
        self.render(input, output).await?;
        Ok(())
    }
}

// ── images-to-text ───────────────────────────────────────────────────────────

/// Transcribes a directory of page images into one Markdown file.
///
/// Pages go to the model one at a time, in page-number order. A page that
/// still fails after the transcriber's retries is dropped with a warning;
/// the item fails only if the directory has no images or no page succeeds.
#[derive(Clone)]
pub struct TranscribeProcessor {
    transcriber: Arc<dyn PageTranscriber>,
    request_delay: Duration,
}

impl TranscribeProcessor {
    pub fn new(transcriber: Arc<dyn PageTranscriber>, request_delay: Duration) -> Self {
        Self {
            transcriber,
            request_delay,
        }
    }

    /// Build on a [`VlmTranscriber`] resolved from `config.transcribe`.
    pub fn from_config(config: &BatchConfig) -> Result<Self, ProcessorError> {
        let transcriber = VlmTranscriber::from_settings(&config.transcribe)?;
        Ok(Self::new(
            Arc::new(transcriber),
            Duration::from_millis(config.transcribe.request_delay_ms),
        ))
    }

    async fn transcribe_dir(&self, dir: &Path, output: &Path) -> Result<(), ProcessorError> {
        let images = page_images(dir).await?;
        if images.is_empty() {
            return Err(ProcessorError::NoImages {
                path: dir.to_path_buf(),
            });
        }

        let total = images.len();
        let mut pages = Vec::with_capacity(total);
        let mut first_error: Option<PageError> = None;

        for (idx, image_path) in images.iter().enumerate() {
            let page_num = idx + 1;
            if idx > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            match self.transcribe_one(page_num, image_path).await {
                Ok(markdown) => {
                    let page = clean_page(&markdown);
                    if page == BLANK_PAGE_MARKER {
                        debug!("{}: page {} is blank", dir.display(), page_num);
                    }
                    pages.push(page);
                }
                Err(e) => {
                    warn!("{}: dropping {}", e, image_path.display());
                    first_error.get_or_insert(e);
                }
            }
        }

        if pages.is_empty() {
            return Err(ProcessorError::AllPagesFailed {
                total,
                first_error: first_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".into()),
            });
        }

        debug!(
            "{}: {}/{} pages transcribed",
            dir.display(),
            pages.len(),
            total
        );
        write_text_atomic(output, &join_pages(&pages)).await
    }

    async fn transcribe_one(&self, page_num: usize, image_path: &Path) -> Result<String, PageError> {
        let image = encode_image_file(image_path)
            .await
            .map_err(|e| PageError::EncodeFailed {
                page: page_num,
                detail: e.to_string(),
            })?;
        self.transcriber.transcribe(page_num, image).await
    }
}

#[async_trait]
impl ItemProcessor for TranscribeProcessor {
    async fn process(&self, input: &Path, output: &Path) -> Result<(), ItemError> {
        self.transcribe_dir(input, output).await?;
        Ok(())
    }
}

/// Image files directly inside `dir`, ordered by page number.
async fn page_images(dir: &Path) -> Result<Vec<PathBuf>, ProcessorError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ProcessorError::Internal(format!("cannot read {}: {}", dir.display(), e)))?;

    let mut images = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ProcessorError::Internal(format!("cannot read {}: {}", dir.display(), e)))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && has_extension(&path, IMAGE_EXTENSIONS) {
            images.push(path);
        }
    }

    images.sort_by(|a, b| {
        page_number(a)
            .cmp(&page_number(b))
            .then_with(|| a.file_name().cmp(&b.file_name()))
    });
    Ok(images)
}

/// The number after the last `_` of the file stem (`page_012.jpg` → 12).
/// Files without one sort first.
fn page_number(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit_once('_'))
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(0)
}

/// Write via a sibling temp file and rename, creating parent directories.
async fn write_text_atomic(path: &Path, text: &str) -> Result<(), ProcessorError> {
    let write_err = |e| ProcessorError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, text).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    Ok(())
}

// ── full-pipeline ────────────────────────────────────────────────────────────

/// Renders a PDF into a staging directory, then transcribes the pages.
///
/// Staged images are kept (`staging_dir/<parent>/<stem>-<hash>/page_NNN.jpg`)
/// so a document can be re-transcribed without rendering it again. The hash
/// is taken over the full input path, so documents sharing a parent name
/// and stem never share a staging directory.
#[derive(Clone)]
pub struct PipelineProcessor {
    render: RenderProcessor,
    transcribe: TranscribeProcessor,
    staging_dir: PathBuf,
}

impl PipelineProcessor {
    pub fn new(render: RenderProcessor, transcribe: TranscribeProcessor, staging_dir: PathBuf) -> Self {
        Self {
            render,
            transcribe,
            staging_dir,
        }
    }

    /// Where the page images of `pdf` are staged.
    pub fn staging_path(&self, pdf: &Path) -> PathBuf {
        let parent = pdf
            .parent()
            .and_then(Path::file_name)
            .map(|n| sanitize_segment(&n.to_string_lossy()))
            .unwrap_or_else(|| "_".to_string());
        let stem = pdf
            .file_stem()
            .map(|s| sanitize_segment(&s.to_string_lossy()))
            .unwrap_or_else(|| "_".to_string());
        let hash = short_hash(&pdf.to_string_lossy());
        self.staging_dir.join(parent).join(format!("{stem}-{hash}"))
    }
}

#[async_trait]
impl ItemProcessor for PipelineProcessor {
    async fn process(&self, input: &Path, output: &Path) -> Result<(), ItemError> {
        let staging = self.staging_path(input);
        self.render.render(input, &staging).await?;
        self.transcribe.transcribe_dir(&staging, output).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgequake_llm::ImageData;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Returns the page's file bytes as its "transcription"; fails on pages
    /// listed in `fail`.
    struct EchoTranscriber {
        fail: Vec<usize>,
        seen: Mutex<Vec<usize>>,
    }

    impl EchoTranscriber {
        fn new(fail: &[usize]) -> Arc<Self> {
            Arc::new(Self {
                fail: fail.to_vec(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PageTranscriber for EchoTranscriber {
        async fn transcribe(&self, page_num: usize, image: ImageData) -> Result<String, PageError> {
            self.seen.lock().unwrap().push(page_num);
            if self.fail.contains(&page_num) {
                return Err(PageError::LlmFailed {
                    page: page_num,
                    retries: 0,
                    detail: "503 Service Unavailable".into(),
                });
            }
            use base64::Engine as _;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&image.data)
                .unwrap();
            Ok(format!("```markdown\n{}\n```", String::from_utf8(bytes).unwrap()))
        }
    }

    fn page_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        dir
    }

    #[test]
    fn page_numbers_come_from_the_stem_suffix() {
        assert_eq!(page_number(Path::new("page_012.jpg")), 12);
        assert_eq!(page_number(Path::new("scan_2_10.png")), 10);
        assert_eq!(page_number(Path::new("cover.jpg")), 0);
    }

    #[tokio::test]
    async fn pages_are_transcribed_in_numeric_order() {
        let dir = page_dir(&[
            ("page_10.jpg", "ten"),
            ("page_2.jpg", "two"),
            ("page_1.jpg", "one"),
            ("notes.txt", "ignored"),
        ]);
        let out = TempDir::new().unwrap();
        let output = out.path().join("nested/doc.md");

        let p = TranscribeProcessor::new(EchoTranscriber::new(&[]), Duration::ZERO);
        p.process(dir.path(), &output).await.unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text, "one\n\ntwo\n\nten\n");
        assert!(!output.with_extension("md.tmp").exists());
    }

    #[tokio::test]
    async fn failed_pages_are_dropped() {
        let dir = page_dir(&[("page_1.jpg", "one"), ("page_2.jpg", "two"), ("page_3.jpg", "three")]);
        let out = TempDir::new().unwrap();
        let output = out.path().join("doc.md");

        let t = EchoTranscriber::new(&[2]);
        let p = TranscribeProcessor::new(t.clone(), Duration::ZERO);
        p.process(dir.path(), &output).await.unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "one\n\nthree\n");
        assert_eq!(*t.seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn all_pages_failing_is_an_item_error() {
        let dir = page_dir(&[("page_1.jpg", "one"), ("page_2.jpg", "two")]);
        let out = TempDir::new().unwrap();
        let output = out.path().join("doc.md");

        let p = TranscribeProcessor::new(EchoTranscriber::new(&[1, 2]), Duration::ZERO);
        let err = p.process(dir.path(), &output).await.unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("All 2 pages failed"), "got: {msg}");
        assert!(msg.contains("503"), "got: {msg}");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn empty_directory_is_an_item_error() {
        let dir = page_dir(&[("readme.txt", "x")]);
        let out = TempDir::new().unwrap();
        let p = TranscribeProcessor::new(EchoTranscriber::new(&[]), Duration::ZERO);
        let err = p
            .process(dir.path(), &out.path().join("doc.md"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No page images"));
    }

    #[tokio::test]
    async fn rerun_overwrites_previous_output() {
        let dir = page_dir(&[("page_1.jpg", "fresh")]);
        let out = TempDir::new().unwrap();
        let output = out.path().join("doc.md");
        std::fs::write(&output, "stale content from an earlier run").unwrap();

        let p = TranscribeProcessor::new(EchoTranscriber::new(&[]), Duration::ZERO);
        p.process(dir.path(), &output).await.unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "fresh\n");
    }

    fn pipeline(staging: &str) -> PipelineProcessor {
        PipelineProcessor::new(
            RenderProcessor::new(RenderSettings::default()),
            TranscribeProcessor::new(EchoTranscriber::new(&[]), Duration::ZERO),
            PathBuf::from(staging),
        )
    }

    #[test]
    fn staging_path_uses_parent_stem_and_hash() {
        let p = pipeline("/stage");
        let staged = p.staging_path(Path::new("/in/2023/report.pdf"));
        assert_eq!(staged.parent(), Some(Path::new("/stage/2023")));
        let name = staged.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("report-"), "got: {name}");
        assert_eq!(name.len(), "report-".len() + 10);
        assert_eq!(p.staging_path(Path::new("/in/2023/report.pdf")), staged);

        let odd = p.staging_path(Path::new("/in/a:b/x|y.pdf"));
        assert_eq!(odd.parent(), Some(Path::new("/stage/a_b")));
        assert!(odd.file_name().unwrap().to_string_lossy().starts_with("x_y-"));
    }

    #[test]
    fn same_named_documents_stage_apart() {
        let p = pipeline("/stage");
        let pairs = [
            ("/in/x/2023/report.pdf", "/in/y/2023/report.pdf"),
            ("/in/a/doc.pdf", "/in/a/doc.PDF"),
            ("/in/a/b:c.pdf", "/in/a/b|c.pdf"),
        ];
        for (one, two) in pairs {
            assert_ne!(
                p.staging_path(Path::new(one)),
                p.staging_path(Path::new(two)),
                "{one} and {two} share a staging directory"
            );
        }
    }

    #[test]
    fn document_to_images_needs_no_provider() {
        assert!(processor_for(TaskKind::DocumentToImages, &BatchConfig::default()).is_ok());
    }
}
