//! Configuration types for batch runs.
//!
//! Everything a run needs is carried in one [`BatchConfig`] value that the
//! caller constructs and hands to [`crate::orchestrator::Orchestrator::new`]
//! and [`crate::processors::processor_for`]. There is no process-wide
//! config: two orchestrators with different task directories can live in
//! the same process (the tests rely on this).
//!
//! A config can be built in code via [`BatchConfig::builder()`] or read
//! from a TOML file via [`BatchConfig::from_toml_file`]. Per-task overrides
//! stored in a task record are layered on top with
//! [`BatchConfig::with_overrides`].

use crate::error::TaskError;
use crate::model::ValueMap;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Configuration for the orchestrator and the bundled processors.
///
/// # Example
/// ```rust
/// use edgequake_batch::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .tasks_dir("/var/lib/pdf2md/tasks")
///     .checkpoint_interval_ms(2_000)
///     .dpi(150)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Directory holding one JSON record per task. Default: `tasks`.
    pub tasks_dir: PathBuf,

    /// File-name prefix of task records. Default: `task_`.
    pub task_file_prefix: String,

    /// How often the background checkpoint writes the in-memory task while a
    /// run is in progress, in milliseconds. Default: 5000.
    ///
    /// Item boundaries already checkpoint; this bounds how stale the record
    /// on disk can get while a single slow item is in flight.
    pub checkpoint_interval_ms: u64,

    /// Rasterisation settings (document-to-images, full-pipeline).
    pub render: RenderSettings,

    /// VLM settings (images-to-text, full-pipeline).
    pub transcribe: TranscribeSettings,

    /// Fused pipeline settings.
    pub pipeline: PipelineSettings,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("tasks"),
            task_file_prefix: "task_".to_string(),
            checkpoint_interval_ms: 5_000,
            render: RenderSettings::default(),
            transcribe: TranscribeSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("tasks_dir", &self.tasks_dir)
            .field("task_file_prefix", &self.task_file_prefix)
            .field("checkpoint_interval_ms", &self.checkpoint_interval_ms)
            .field("render", &self.render)
            .field("transcribe", &self.transcribe)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// How page images are written by the render stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl PageImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PageImageFormat::Jpeg => "jpg",
            PageImageFormat::Png => "png",
        }
    }
}

/// Settings for rasterising PDF pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Rendering DPI. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Cap on either rendered dimension, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Output image format. Default: JPEG.
    pub image_format: PageImageFormat,

    /// JPEG quality, 1–100. Ignored for PNG. Default: 95.
    pub quality: u8,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory containing libpdfium. Falls back to the system library.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2000,
            image_format: PageImageFormat::Jpeg,
            quality: 95,
            password: None,
            pdfium_lib_path: None,
        }
    }
}

/// Settings for sending page images to a vision model.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeSettings {
    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    #[serde(skip)]
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries per page on a VLM failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Pause between consecutive page requests, in milliseconds. Default: 500.
    pub request_delay_ms: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Custom user instruction sent alongside each image.
    pub user_prompt: Option<String>,
}

impl Default for TranscribeSettings {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            request_delay_ms: 500,
            system_prompt: None,
            user_prompt: None,
        }
    }
}

impl fmt::Debug for TranscribeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscribeSettings")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("request_delay_ms", &self.request_delay_ms)
            .finish()
    }
}

/// Settings for the fused document → text pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Where intermediate page images are kept. Default: `staging`.
    ///
    /// Images survive the run so a later images-to-text task can reuse them.
    pub staging_dir: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("staging"),
        }
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TaskError::InvalidConfig(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let config: BatchConfig = toml::from_str(&text).map_err(|e| {
            TaskError::InvalidConfig(format!("cannot parse '{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.checkpoint_interval_ms == 0 {
            return Err(TaskError::InvalidConfig(
                "checkpoint interval must be > 0".into(),
            ));
        }
        if self.task_file_prefix.contains(['/', '\\']) {
            return Err(TaskError::InvalidConfig(format!(
                "task file prefix must not contain path separators, got '{}'",
                self.task_file_prefix
            )));
        }
        if !(72..=400).contains(&self.render.dpi) {
            return Err(TaskError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.render.dpi
            )));
        }
        if !(1..=100).contains(&self.render.quality) {
            return Err(TaskError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                self.render.quality
            )));
        }
        Ok(())
    }

    /// Layer per-task overrides on top of this config.
    ///
    /// Recognised keys: `dpi`, `quality`, `image_format`, `model`,
    /// `provider`, `temperature`, `max_tokens`, `max_retries`,
    /// `staging_dir`. Unknown keys are logged and ignored.
    pub fn with_overrides(&self, overrides: &ValueMap) -> Result<Self, TaskError> {
        let mut config = self.clone();
        for (key, value) in overrides {
            match key.as_str() {
                "dpi" => config.render.dpi = as_int(key, value)?,
                "quality" => config.render.quality = as_int(key, value)?,
                "image_format" => {
                    config.render.image_format = serde_json::from_value(value.clone())
                        .map_err(|e| bad_override(key, value, e))?
                }
                "model" => config.transcribe.model = Some(as_string(key, value)?),
                "provider" => config.transcribe.provider_name = Some(as_string(key, value)?),
                "temperature" => {
                    config.transcribe.temperature = value
                        .as_f64()
                        .ok_or_else(|| bad_override(key, value, "expected a number"))?
                        .clamp(0.0, 2.0) as f32
                }
                "max_tokens" => config.transcribe.max_tokens = as_int(key, value)?,
                "max_retries" => config.transcribe.max_retries = as_int(key, value)?,
                "staging_dir" => {
                    config.pipeline.staging_dir = PathBuf::from(as_string(key, value)?)
                }
                other => warn!("Ignoring unknown task override '{}'", other),
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn bad_override(key: &str, value: &Value, why: impl fmt::Display) -> TaskError {
    TaskError::InvalidConfig(format!("override '{key}' = {value}: {why}"))
}

/// A non-negative integer (or numeric string) that must fit in `T`.
fn as_int<T>(key: &str, value: &Value) -> Result<T, TaskError>
where
    T: TryFrom<u64>,
    T::Error: fmt::Display,
{
    let n = value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| bad_override(key, value, "expected a non-negative integer"))?;
    T::try_from(n).map_err(|e| bad_override(key, value, e))
}

fn as_string(key: &str, value: &Value) -> Result<String, TaskError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| bad_override(key, value, "expected a string"))
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn tasks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tasks_dir = dir.into();
        self
    }

    pub fn task_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.task_file_prefix = prefix.into();
        self
    }

    pub fn checkpoint_interval_ms(mut self, ms: u64) -> Self {
        self.config.checkpoint_interval_ms = ms;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.render.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn image_format(mut self, format: PageImageFormat) -> Self {
        self.config.render.image_format = format;
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.config.render.quality = quality.clamp(1, 100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.render.password = Some(pwd.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.render.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.transcribe.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.transcribe.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.transcribe.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.transcribe.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.transcribe.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.transcribe.max_retries = n;
        self
    }

    pub fn request_delay_ms(mut self, ms: u64) -> Self {
        self.config.transcribe.request_delay_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.transcribe.system_prompt = Some(prompt.into());
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pipeline.staging_dir = dir.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, TaskError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        let c = BatchConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.task_file_prefix, "task_");
        assert_eq!(c.checkpoint_interval(), Duration::from_secs(5));
        assert_eq!(c.render.image_format.extension(), "jpg");
    }

    #[test]
    fn zero_interval_rejected() {
        let err = BatchConfig::builder()
            .checkpoint_interval_ms(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("checkpoint interval"));
    }

    #[test]
    fn prefix_with_separator_rejected() {
        assert!(BatchConfig::builder()
            .task_file_prefix("a/b")
            .build()
            .is_err());
    }

    #[test]
    fn overrides_apply_known_keys() {
        let mut o = ValueMap::new();
        o.insert("dpi".into(), json!(150));
        o.insert("model".into(), json!("gpt-4.1-mini"));
        o.insert("image_format".into(), json!("png"));
        o.insert("quality".into(), json!("80"));
        o.insert("something_else".into(), json!(true));

        let c = BatchConfig::default().with_overrides(&o).unwrap();
        assert_eq!(c.render.dpi, 150);
        assert_eq!(c.render.quality, 80);
        assert_eq!(c.render.image_format, PageImageFormat::Png);
        assert_eq!(c.transcribe.model.as_deref(), Some("gpt-4.1-mini"));
    }

    #[test]
    fn override_type_mismatch_is_an_error() {
        let mut o = ValueMap::new();
        o.insert("model".into(), json!(42));
        assert!(BatchConfig::default().with_overrides(&o).is_err());
    }

    #[test]
    fn override_out_of_range_dpi_is_an_error() {
        let mut o = ValueMap::new();
        o.insert("dpi".into(), json!(1000));
        assert!(BatchConfig::default().with_overrides(&o).is_err());
    }

    #[test]
    fn oversized_overrides_are_rejected_not_truncated() {
        // 2^32 + 200 would wrap to a valid 200 dpi.
        let mut o = ValueMap::new();
        o.insert("dpi".into(), json!(4_294_967_496u64));
        let err = BatchConfig::default().with_overrides(&o).unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfig(_)));
        assert!(err.to_string().contains("dpi"));

        let mut o = ValueMap::new();
        o.insert("max_retries".into(), json!(u64::MAX));
        assert!(BatchConfig::default().with_overrides(&o).is_err());

        // 256 + 80 would wrap to a valid quality of 80.
        let mut o = ValueMap::new();
        o.insert("quality".into(), json!(336));
        assert!(BatchConfig::default().with_overrides(&o).is_err());

        let mut o = ValueMap::new();
        o.insert("quality".into(), json!(150));
        assert!(BatchConfig::default().with_overrides(&o).is_err());
    }

    #[test]
    fn default_staging_dir_is_staging() {
        assert_eq!(
            BatchConfig::default().pipeline.staging_dir,
            PathBuf::from("staging")
        );
    }

    #[test]
    fn toml_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("batch.toml");
        std::fs::write(
            &path,
            "tasks_dir = \"/srv/tasks\"\n\n[render]\ndpi = 300\n\n[transcribe]\nmodel = \"gpt-4.1\"\n",
        )
        .unwrap();

        let c = BatchConfig::from_toml_file(&path).unwrap();
        assert_eq!(c.tasks_dir, PathBuf::from("/srv/tasks"));
        assert_eq!(c.render.dpi, 300);
        assert_eq!(c.render.quality, 95);
        assert_eq!(c.transcribe.model.as_deref(), Some("gpt-4.1"));
        assert_eq!(c.checkpoint_interval_ms, 5_000);
    }

    #[test]
    fn toml_file_missing_is_config_error() {
        let err = BatchConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfig(_)));
    }
}
