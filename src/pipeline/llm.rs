//! VLM interaction: one page image in, one page of Markdown out.
//!
//! [`PageTranscriber`] is the seam between the transcription processor and
//! the model. [`VlmTranscriber`] is the real implementation on top of an
//! `edgequake-llm` provider; tests substitute a scripted one.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! load. Exponential backoff (`retry_backoff_ms * 2^attempt`) avoids
//! hammering the endpoint: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s. Retries happen here, per page, so the orchestrator
//! never has to retry a whole item because of one flaky request.

use crate::config::TranscribeSettings;
use crate::error::{PageError, ProcessorError};
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Turns one page image into Markdown.
#[async_trait]
pub trait PageTranscriber: Send + Sync {
    async fn transcribe(&self, page_num: usize, image: ImageData) -> Result<String, PageError>;
}

/// [`PageTranscriber`] backed by a vision-capable LLM provider.
pub struct VlmTranscriber {
    provider: Arc<dyn LLMProvider>,
    settings: TranscribeSettings,
}

impl VlmTranscriber {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: TranscribeSettings) -> Self {
        Self { provider, settings }
    }

    /// Resolve the provider from `settings` and build a transcriber.
    pub fn from_settings(settings: &TranscribeSettings) -> Result<Self, ProcessorError> {
        let provider = resolve_provider(settings)?;
        Ok(Self::new(provider, settings.clone()))
    }

    fn messages(&self, image: ImageData) -> Vec<ChatMessage> {
        let system = self
            .settings
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let user = self
            .settings
            .user_prompt
            .as_deref()
            .unwrap_or(DEFAULT_USER_PROMPT);
        vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(user, vec![image]),
        ]
    }
}

#[async_trait]
impl PageTranscriber for VlmTranscriber {
    async fn transcribe(&self, page_num: usize, image: ImageData) -> Result<String, PageError> {
        let start = Instant::now();
        let messages = self.messages(image);
        let options = build_options(&self.settings);
        let max_retries = self.settings.max_retries;

        let mut last_err: Option<String> = None;
        for attempt in 0..=max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.settings.retry_backoff_ms, attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page_num, attempt, max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {:?}",
                        page_num,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(PageError::LlmFailed {
            page: page_num,
            retries: max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Wait before retry `attempt` (1-based).
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

fn build_options(settings: &TranscribeSettings) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a pre-built provider in `settings.provider`;
/// 2. `settings.provider_name` plus `settings.model`;
/// 3. `EDGEQUAKE_LLM_PROVIDER` plus `EDGEQUAKE_MODEL` from the environment;
/// 4. `OPENAI_API_KEY` present: OpenAI;
/// 5. whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(settings: &TranscribeSettings) -> Result<Arc<dyn LLMProvider>, ProcessorError> {
    if let Some(ref provider) = settings.provider {
        return Ok(Arc::clone(provider));
    }

    let model = settings.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = settings.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ProcessorError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ProcessorError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ProcessorError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&TranscribeSettings::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1_000);
        assert_eq!(backoff_ms(500, 3), 2_000);
        assert_eq!(backoff_ms(u64::MAX, 5), u64::MAX);
    }
}
