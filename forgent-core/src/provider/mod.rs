//! # LLM Provider Interface
//!
//! A trait-based abstraction for communicating with LLM backends.
//!
//! ## Design
//! - `LlmProvider` trait defines the streaming interface the agent drives
//! - Implementations for OpenAI-compatible endpoints and Anthropic
//! - `Provider` dispatches between them based on the configured model id
//! - Usage tracking

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;

use crate::config::ModelSettings;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

// ============================================================================
// Core Types
// ============================================================================

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    /// Ask the backend for a JSON object, where it supports that
    pub json_output: bool,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_json_output(mut self, json_output: bool) -> Self {
        self.json_output = json_output;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    /// Map the OpenAI/Anthropic wire names onto a finish reason
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A streaming chunk from the model
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text content delta
    Text(String),
    /// Stream finished
    Done {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
    /// Error occurred
    Error(String),
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Model not found
    ModelNotFound(String),
    /// Authentication failed
    AuthenticationFailed,
    /// Other error
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::ModelNotFound(m) => write!(f, "Model not found: {}", m),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Map a non-success HTTP status onto a provider error
pub(crate) fn status_error(status: u16, message: String, retry_after: Option<u64>) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited { retry_after },
        401 | 403 => ProviderError::AuthenticationFailed,
        404 => ProviderError::ModelNotFound(message),
        _ => ProviderError::Api { status, message },
    }
}

/// The main LLM provider trait
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "anthropic")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Send a completion request and stream the response
    fn stream(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<StreamReceiver, ProviderError>> + Send;
}

/// Receiver for streaming responses
pub struct StreamReceiver {
    inner: Pin<Box<dyn Stream<Item = StreamChunk> + Send>>,
}

impl StreamReceiver {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = StreamChunk> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Collect all text chunks into a single string
    pub async fn collect_text(mut self) -> Result<String, ProviderError> {
        use futures_util::StreamExt;

        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            match chunk {
                StreamChunk::Text(t) => text.push_str(&t),
                StreamChunk::Done { .. } => break,
                StreamChunk::Error(e) => return Err(ProviderError::Other(e)),
            }
        }
        Ok(text)
    }
}

impl Stream for StreamReceiver {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Buffer that splits an SSE byte stream into complete events.
///
/// Bytes are kept raw until an event is complete, so a multi-byte character
/// split across network chunks decodes intact.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete event, if any
    pub(crate) fn next_event(&mut self) -> Option<String> {
        let (pos, sep_len) = find_event_end(&self.buffer)?;
        let event: Vec<u8> = self.buffer.drain(..pos + sep_len).take(pos).collect();
        Some(String::from_utf8_lossy(&event).replace("\r\n", "\n"))
    }
}

/// Position and length of the first blank-line separator (`\n\n` or `\r\n\r\n`)
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    Local,
}

impl ProviderConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: Some(api_key.into()),
            base_url: Some("https://api.openai.com/v1".into()),
            default_model: Some("gpt-4o".into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("anthropic-version".into(), "2023-06-01".into());

        Self {
            provider_type: ProviderType::Anthropic,
            api_key: Some(api_key.into()),
            base_url: Some("https://api.anthropic.com/v1".into()),
            default_model: Some("claude-sonnet-4-20250514".into()),
            headers,
            timeout_secs: Some(120),
        }
    }

    /// An OpenAI-compatible server on the local machine (Ollama by default)
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Local,
            api_key: None,
            base_url: Some(base_url.into()),
            default_model: Some(model.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    /// Build a config from `LiteLLMModel` settings.
    ///
    /// The model id follows the `provider/model` convention: `anthropic/…`
    /// selects Anthropic, `ollama/…` a local Ollama server, `openai/…` or no
    /// prefix an OpenAI-compatible endpoint.
    pub fn from_model_settings(settings: &ModelSettings, api_key: Option<String>) -> Self {
        let (prefix, model) = match settings.model_id.split_once('/') {
            Some((prefix, model)) if matches!(prefix, "openai" | "anthropic" | "ollama") => {
                (prefix, model.to_string())
            }
            _ => ("openai", settings.model_id.clone()),
        };

        let key = api_key.unwrap_or_default();
        let mut config = match prefix {
            "anthropic" => Self::anthropic(key),
            "ollama" => Self::local("http://localhost:11434/v1", model.clone()),
            _ => Self::openai(key),
        };

        config.default_model = Some(model);
        if let Some(base) = &settings.api_base {
            config.base_url = Some(base.trim_end_matches('/').to_string());
        }
        if let Some(secs) = settings.timeout_secs {
            config.timeout_secs = Some(secs);
        }
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ============================================================================
// Dispatching provider
// ============================================================================

/// The provider selected at startup
pub enum Provider {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
}

/// Create the provider described by `config`
pub fn build_provider(config: ProviderConfig) -> Result<Provider, ProviderError> {
    match config.provider_type {
        ProviderType::Anthropic => Ok(Provider::Anthropic(AnthropicProvider::new(config)?)),
        ProviderType::OpenAI | ProviderType::Local => {
            Ok(Provider::OpenAI(OpenAIProvider::new(config)?))
        }
    }
}

impl LlmProvider for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::OpenAI(p) => p.name(),
            Provider::Anthropic(p) => p.name(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            Provider::OpenAI(p) => p.default_model(),
            Provider::Anthropic(p) => p.default_model(),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        match self {
            Provider::OpenAI(p) => p.stream(request).await,
            Provider::Anthropic(p) => p.stream(request).await,
        }
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn model_settings(model_id: &str) -> ModelSettings {
        ModelSettings {
            model_id: model_id.to_string(),
            api_base: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are helpful");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are helpful");

        let user = ChatMessage::user("Hello");
        assert_eq!(user.role, Role::User);

        let asst = ChatMessage::assistant("Hi there!");
        assert_eq!(asst.role, Role::Assistant);
    }

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")])
            .with_model("gpt-4o")
            .with_temperature(0.7)
            .with_max_tokens(1000)
            .with_json_output(true);

        assert_eq!(request.model, Some("gpt-4o".into()));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
        assert!(request.json_output);
    }

    #[test]
    fn test_provider_config_from_model_settings() {
        let config = ProviderConfig::from_model_settings(
            &model_settings("anthropic/claude-sonnet-4-20250514"),
            Some("sk-ant".into()),
        );
        assert_eq!(config.provider_type, ProviderType::Anthropic);
        assert_eq!(config.default_model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert!(config.headers.contains_key("anthropic-version"));

        let config = ProviderConfig::from_model_settings(&model_settings("openai/gpt-4o-mini"), None);
        assert_eq!(config.provider_type, ProviderType::OpenAI);
        assert_eq!(config.default_model.as_deref(), Some("gpt-4o-mini"));

        let config = ProviderConfig::from_model_settings(&model_settings("ollama/llama3"), None);
        assert_eq!(config.provider_type, ProviderType::Local);
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:11434/v1"));
    }

    #[test]
    fn test_unknown_prefix_keeps_full_model_id() {
        let mut settings = model_settings("mistralai/Mistral-7B");
        settings.api_base = Some("http://gpu-box:8000/v1/".into());
        settings.timeout_secs = Some(30);

        let config = ProviderConfig::from_model_settings(&settings, None);
        assert_eq!(config.provider_type, ProviderType::OpenAI);
        assert_eq!(config.default_model.as_deref(), Some("mistralai/Mistral-7B"));
        assert_eq!(config.base_url.as_deref(), Some("http://gpu-box:8000/v1"));
        assert_eq!(config.timeout_secs, Some(30));
    }

    #[test]
    fn test_status_error() {
        assert!(matches!(status_error(429, String::new(), Some(2)), ProviderError::RateLimited { retry_after: Some(2) }));
        assert!(matches!(status_error(401, String::new(), None), ProviderError::AuthenticationFailed));
        assert!(matches!(status_error(500, "boom".into(), None), ProviderError::Api { status: 500, .. }));
    }

    #[test]
    fn test_sse_buffer_splits_events() {
        let mut buffer = SseBuffer::default();
        buffer.push(b"data: one\n\ndata: t");
        assert_eq!(buffer.next_event().as_deref(), Some("data: one"));
        assert_eq!(buffer.next_event(), None);

        buffer.push(b"wo\r\n\r\n");
        assert_eq!(buffer.next_event().as_deref(), Some("data: two"));
    }

    #[test]
    fn test_sse_buffer_keeps_split_characters() {
        let payload = "data: é 🦀\n\n".as_bytes();
        for split in 1..payload.len() {
            let mut buffer = SseBuffer::default();
            buffer.push(&payload[..split]);
            buffer.push(&payload[split..]);
            assert_eq!(buffer.next_event().as_deref(), Some("data: é 🦀"), "split at {}", split);
            assert_eq!(buffer.next_event(), None);
        }
    }

    #[test]
    fn test_collect_text() {
        let receiver = StreamReceiver::new(futures_util::stream::iter(vec![
            StreamChunk::Text("Hel".into()),
            StreamChunk::Text("lo".into()),
            StreamChunk::Done { finish_reason: FinishReason::Stop, usage: None },
            StreamChunk::Text("ignored".into()),
        ]));

        let text = tokio_test::block_on(receiver.collect_text()).unwrap();
        assert_eq!(text, "Hello");
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();

        tracker.track("gpt-4o", &Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        });

        tracker.track("gpt-4o", &Usage {
            prompt_tokens: 200,
            completion_tokens: 100,
            total_tokens: 300,
        });

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_prompt_tokens, 300);
        assert_eq!(tracker.total_completion_tokens, 150);
        assert_eq!(tracker.total_tokens(), 450);
    }
}
