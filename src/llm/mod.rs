//! LLM providers and client
//!
//! A single [`CompletionApi`] seam sits in front of the Gemini and
//! `OpenRouter` chat endpoints. Requests carry role-tagged history, the
//! current user text and at most one inline media attachment.

mod http_utils;
/// Implementations of specific LLM providers
pub mod providers;

use crate::config::{Settings, LLM_INITIAL_BACKOFF_MS, LLM_MAX_RETRIES};
use crate::session::Turn;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    JsonError(String),
    /// Missing provider configuration or API key
    #[error("Missing client/API key: {0}")]
    MissingConfig(String),
    /// Rate limit exceeded (429), optionally with a wait time
    #[error("Rate limit exceeded: {message} (wait: {wait_secs:?}s)")]
    RateLimit {
        /// Retry-After duration in seconds, if provided by the server
        wait_secs: Option<u64>,
        /// Error message from the server
        message: String,
    },
    /// Any other unexpected error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Binary attachment sent inline with the user turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineMedia {
    /// MIME type as reported by the transport
    pub mime_type: String,
    /// Raw bytes
    pub bytes: Vec<u8>,
}

impl InlineMedia {
    /// Create an attachment
    #[must_use]
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// `image/*`
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// `audio/*`
    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    /// Base64 payload
    #[must_use]
    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// `data:` URI of the payload
    ///
    /// # Examples
    ///
    /// ```
    /// use oxide_chat::llm::InlineMedia;
    ///
    /// let media = InlineMedia::new("image/jpeg", vec![0xff, 0xd8]);
    /// assert_eq!(media.data_uri(), "data:image/jpeg;base64,/9g=");
    /// ```
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// One chat completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Instruction placed before the conversation
    pub system_prompt: String,
    /// Earlier turns, oldest first
    pub history: Vec<Turn>,
    /// Current user text, possibly empty when only media was sent
    pub user_text: String,
    /// Optional image or audio for the current turn
    pub media: Option<InlineMedia>,
    /// Provider model identifier
    pub model: String,
    /// Maximum output tokens
    pub max_tokens: u32,
}

/// Narrow interface to a chat completion endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Produce the assistant reply for a request
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Client dispatching to the provider selected in settings
pub struct LlmClient {
    provider_name: String,
    gemini: Option<providers::GeminiProvider>,
    openrouter: Option<providers::OpenRouterProvider>,
}

impl LlmClient {
    /// Create providers for every configured API key
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            provider_name: settings.llm_provider.trim().to_lowercase(),
            gemini: settings
                .gemini_api_key
                .as_ref()
                .filter(|k| !k.is_empty())
                .map(|k| providers::GeminiProvider::new(k.clone())),
            openrouter: settings
                .openrouter_api_key
                .as_ref()
                .filter(|k| !k.is_empty())
                .map(|k| providers::OpenRouterProvider::new(k.clone())),
        }
    }

    /// Name of the selected provider
    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Whether the selected provider has an API key
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.get_provider().is_ok()
    }

    fn get_provider(&self) -> Result<&dyn CompletionApi, LlmError> {
        match self.provider_name.as_str() {
            "gemini" => self.gemini.as_ref().map(|p| p as &dyn CompletionApi),
            "openrouter" => self.openrouter.as_ref().map(|p| p as &dyn CompletionApi),
            _ => None,
        }
        .ok_or_else(|| LlmError::MissingConfig(self.provider_name.clone()))
    }

    /// Delay before the next attempt, `None` when the error is not transient
    fn get_retry_delay(error: &LlmError, attempt: u32) -> Option<Duration> {
        let exponential = LLM_INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(attempt - 1));
        match error {
            LlmError::RateLimit {
                wait_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(secs + 1)),
            LlmError::RateLimit { wait_secs: None, .. } | LlmError::NetworkError(_) => {
                Some(Duration::from_millis(exponential))
            }
            LlmError::ApiError(msg) => {
                let msg = msg.to_lowercase();
                ["500", "502", "503", "504", "overloaded", "timeout"]
                    .iter()
                    .any(|needle| msg.contains(needle))
                    .then(|| Duration::from_millis(exponential))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl CompletionApi for LlmClient {
    #[instrument(skip(self, request), fields(provider = %self.provider_name, model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let provider = self.get_provider()?;
        debug!(
            history_len = request.history.len(),
            has_media = request.media.is_some(),
            "Sending completion request"
        );

        let mut attempt = 1;
        loop {
            match provider.complete(request.clone()).await {
                Ok(reply) => {
                    info!(attempt, reply_len = reply.len(), "Completion received");
                    return Ok(reply);
                }
                Err(e) => {
                    let delay = (attempt < LLM_MAX_RETRIES)
                        .then(|| Self::get_retry_delay(&e, attempt))
                        .flatten();
                    let Some(delay) = delay else {
                        warn!(attempt, error = %e, "Completion request failed");
                        return Err(e);
                    };
                    warn!(
                        attempt,
                        backoff_ms = delay.as_millis(),
                        error = %e,
                        "Retrying completion request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
