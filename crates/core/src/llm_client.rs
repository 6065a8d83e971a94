use crate::error::PortError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// The completion port: a black-box language model that turns a system prompt and
/// a user prompt into free-form text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming completion call.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortError>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4.1").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

fn classify_openai_error(err: OpenAIError) -> PortError {
    match err {
        OpenAIError::Reqwest(e) => PortError::network(e.to_string()),
        other => PortError::provider(other.to_string()),
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.0)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(classify_openai_error)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_prompt)
                    .build()
                    .map_err(classify_openai_error)?
                    .into(),
            ])
            .build()
            .map_err(classify_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_openai_error)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| PortError::empty_response("LLM response had no text content"))
    }
}

/// Wraps another client with call logging and an optional deadline.
pub struct LoggingLLMClient {
    inner: Arc<dyn LLMClient>,
    model: String,
    timeout: Option<Duration>,
}

impl LoggingLLMClient {
    pub fn new(inner: Arc<dyn LLMClient>, model: impl Into<String>) -> Self {
        Self {
            inner,
            model: model.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LLMClient for LoggingLLMClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortError> {
        let start = Instant::now();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.complete(system_prompt, user_prompt))
                .await
                .unwrap_or_else(|_| Err(PortError::timeout(limit))),
            None => self.inner.complete(system_prompt, user_prompt).await,
        };
        let duration_ms = start.elapsed().as_millis();

        match &result {
            Ok(text) => info!(
                model = %self.model,
                duration_ms = %duration_ms,
                chars = text.len(),
                "Completion request finished"
            ),
            Err(e) => error!(
                model = %self.model,
                duration_ms = %duration_ms,
                error = %e,
                "Completion request failed"
            ),
        }
        result
    }
}

/// A completion call captured by [`CannedLLMClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCall {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// A deterministic `LLMClient` for offline runs and scenario tests.
///
/// Replies are chosen by the first registered needle found in the prompt text,
/// falling back to a fixed reply. Every call is recorded.
pub struct CannedLLMClient {
    rules: Vec<(String, String)>,
    fallback: String,
    calls: Mutex<Vec<CompletionCall>>,
}

impl CannedLLMClient {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replies with `response` whenever a prompt contains `needle`.
    pub fn respond_to(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), response.into()));
        self
    }

    /// Returns every call made so far, oldest first.
    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// A client preloaded with generic replies for each built-in prompt, used when
    /// running without network access.
    pub fn health_demo() -> Self {
        Self::new(
            "HealthBot is running offline, so this overview is a placeholder. \
             It would normally explain what the condition is, its common symptoms, \
             how it is diagnosed, and how it is treated or managed day to day.",
        )
        .respond_to(
            "# Generate Quiz Questions",
            r#"["What is one common symptom of this condition?",
"Name one way this condition can be managed day to day.",
"When should someone see a doctor about this condition?",
"What lifestyle change can lower the risk of this condition?",
"Why is regular follow-up care important?"]"#,
        )
        .respond_to(
            "# Grade Answer",
            "Grade: Pass\nFeedback:\n- Strengths:\n  - The answer addresses the question.\n- Improvements:\n  - Offline mode cannot check medical accuracy.",
        )
        .respond_to(
            "# Suggest Related Topics",
            r#"["Healthy eating basics", "Exercise and heart health", "Managing stress"]"#,
        )
    }
}

#[async_trait]
impl LLMClient for CannedLLMClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, PortError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(CompletionCall {
                system_prompt: system_prompt.to_string(),
                user_prompt: user_prompt.to_string(),
            });
        }
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| user_prompt.contains(needle) || system_prompt.contains(needle))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.fallback.clone());
        debug!(chars = reply.len(), "Canned completion served");
        Ok(reply)
    }
}
