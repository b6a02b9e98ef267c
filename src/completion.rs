use crate::config::ConfigError;
use crate::conversation::Conversation;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse},
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Everything one chat completion call needs besides credentials
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub conversation: &'a Conversation,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// A blocking-per-call chat model backend
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String>;
}

/// Key variable consulted when no `--openai-key-env` is given
pub const DEFAULT_KEY_ENV: &str = "OPENAI_API_KEY";

/// Read the API key from `key_env`, or from `OPENAI_API_KEY` when unset
fn resolve_api_key(
    key_env: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let key_env = key_env.unwrap_or(DEFAULT_KEY_ENV);
    match lookup(key_env) {
        Some(api_key) if !api_key.is_empty() => Ok(api_key),
        _ => Err(ConfigError::MissingCredential(key_env.to_string())),
    }
}

/// Chat completion client for OpenAI-compatible endpoints
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
}

impl OpenAiClient {
    /// Build a client, reading the API key from `key_env` when given.
    ///
    /// Without `key_env` the key comes from `OPENAI_API_KEY`. A missing or
    /// empty key is a configuration error.
    pub fn new(api_base: Option<&str>, key_env: Option<&str>) -> Result<Self, ConfigError> {
        let api_key = resolve_api_key(key_env, |name| std::env::var(name).ok())?;
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);

        if let Some(api_base) = api_base {
            openai_config = openai_config.with_api_base(api_base);
        }

        Ok(Self::with_config(openai_config))
    }

    pub fn with_config(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
        }
    }

    fn build_request(&self, request: &CompletionRequest<'_>) -> Result<CreateChatCompletionRequest> {
        CreateChatCompletionRequestArgs::default()
            .model(request.model)
            .messages(request.conversation.to_openai_messages()?)
            .temperature(request.temperature as f32)
            .max_tokens(request.max_tokens)
            .build()
            .context("Failed to build chat completion request")
    }

    fn extract_content(response: CreateChatCompletionResponse) -> String {
        match response.choices.into_iter().next() {
            Some(choice) => choice.message.content.unwrap_or_default(),
            None => String::new(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let chat_request = self.build_request(request)?;
        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .with_context(|| format!("Chat completion failed for model {}", request.model))?;

        if let Some(usage) = &response.usage {
            debug!(
                model = request.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion finished"
            );
        }

        Ok(Self::extract_content(response))
    }
}

/// Backoff settings for [`RetryingClient`]
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; zero disables retrying
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Wraps a client with exponential backoff retries
pub struct RetryingClient<C> {
    inner: C,
    retry: RetryConfig,
}

impl<C: CompletionClient> RetryingClient<C> {
    pub fn new(inner: C, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl<C: CompletionClient> CompletionClient for RetryingClient<C> {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let mut retry = 0;
        loop {
            match self.inner.complete(request).await {
                Ok(content) => return Ok(content),
                Err(err) if retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    warn!(
                        model = request.model,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "completion failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
