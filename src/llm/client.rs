//! OpenRouter-backed chat completion client with primary/fallback dispatch.

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs},
    Client,
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::LlmError;
use crate::config::Config;

/// One model attempt within a deadline. Dispatch is written against this
/// seam so the fallback sequencing can be exercised without a live endpoint.
trait ChatBackend {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatCompletionRequestMessage],
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        budget: Duration,
    ) -> Result<String, LlmError>;
}

#[derive(Clone)]
pub struct LlmClient {
    backend: OpenAiBackend,
    default_model: String,
    fallback_model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let api_config = OpenAIConfig::new()
            .with_api_base(&config.openrouter_url)
            .with_api_key(&config.openrouter_api_key);

        Self {
            backend: OpenAiBackend {
                client: Client::with_config(api_config),
            },
            default_model: config.default_model.clone(),
            fallback_model: config.fallback_model.clone(),
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    /// Generate a reply, trying the primary model and then the fallback once.
    ///
    /// One overall deadline covers both attempts: the primary gets half the
    /// budget so a hung primary still leaves the fallback room to answer, and
    /// a fast primary failure hands the fallback everything that remains.
    pub async fn generate(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        model_override: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<String, LlmError> {
        dispatch(
            &self.backend,
            model_override.unwrap_or(&self.default_model),
            &self.fallback_model,
            self.timeout,
            messages,
            temperature,
            max_tokens,
        )
        .await
    }
}

async fn dispatch<B: ChatBackend>(
    backend: &B,
    primary: &str,
    fallback: &str,
    timeout: Duration,
    messages: Vec<ChatCompletionRequestMessage>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
) -> Result<String, LlmError> {
    let started = Instant::now();

    let primary_budget = if primary == fallback {
        timeout
    } else {
        timeout / 2
    };

    match backend
        .complete(primary, &messages, temperature, max_tokens, primary_budget)
        .await
    {
        Ok(text) => Ok(text),
        Err(e) if primary == fallback => Err(e),
        Err(e) => {
            warn!("Primary model {} failed ({}), trying fallback", primary, e);
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(LlmError::Timeout);
            }
            let text = backend
                .complete(fallback, &messages, temperature, max_tokens, remaining)
                .await?;
            info!("Fallback model {} answered", fallback);
            Ok(text)
        }
    }
}

#[derive(Clone)]
struct OpenAiBackend {
    client: Client<OpenAIConfig>,
}

impl ChatBackend for OpenAiBackend {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatCompletionRequestMessage],
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        budget: Duration,
    ) -> Result<String, LlmError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(model).messages(messages.to_vec());
        if let Some(t) = temperature {
            builder.temperature(t);
        }
        if let Some(n) = max_tokens {
            builder.max_tokens(n);
        }
        let request = builder.build().map_err(|e| LlmError::Api(e.to_string()))?;

        let response = tokio::time::timeout(budget, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::MalformedResponse);
        }
        Ok(content)
    }
}
