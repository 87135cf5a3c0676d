//! OpenAI-compatible provider implementation
//!
//! Works with OpenAI, Azure OpenAI, vLLM, Ollama, and other OpenAI-compatible APIs.

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or("https://api.openai.com/v1")
    }

    fn build_request(&self, request: CompletionRequest) -> OpenAIRequest {
        let model = request
            .model
            .unwrap_or_else(|| self.default_model().to_string());

        OpenAIRequest {
            model,
            messages: request.messages.into_iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: serde_json::json!({ "include_usage": true }),
            response_format: request
                .json_output
                .then(|| serde_json::json!({ "type": "json_object" })),
            stop: request.stop,
        }
    }
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &str {
        match self.config.provider_type {
            ProviderType::Local => "local",
            _ => "openai",
        }
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("gpt-4o")
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let api_request = self.build_request(request);
        debug!(model = %api_request.model, messages = api_request.messages.len(), "openai stream request");

        let mut req = self.client
            .post(format!("{}/chat/completions", self.base_url()))
            .json(&api_request);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req.send().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text, retry_after));
        }

        // Create async stream from SSE response
        let stream = async_stream::stream! {
            use futures_util::StreamExt;

            let mut byte_stream = response.bytes_stream();
            let mut buffer = SseBuffer::default();
            let mut end = StreamEnd::default();

            while let Some(chunk_result) = byte_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push(&bytes);

                        while let Some(event) = buffer.next_event() {
                            for chunk in parse_sse_event(&event, &mut end) {
                                let done = matches!(chunk, StreamChunk::Done { .. });
                                yield chunk;
                                if done {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield StreamChunk::Error(e.to_string());
                        return;
                    }
                }
            }

            // Connection closed without [DONE]
            if let Some(chunk) = end.finish() {
                yield chunk;
            }
        };

        Ok(StreamReceiver::new(stream))
    }
}

/// Finish reason and usage seen so far.
///
/// With `include_usage` the usage arrives in its own chunk after the one
/// carrying `finish_reason`, so `Done` waits for `[DONE]`.
#[derive(Debug, Default)]
struct StreamEnd {
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl StreamEnd {
    fn finish(&mut self) -> Option<StreamChunk> {
        let finish_reason = self.finish_reason.take()?;
        Some(StreamChunk::Done {
            finish_reason,
            usage: self.usage.take(),
        })
    }
}

/// Translate one SSE event into stream chunks
fn parse_sse_event(event: &str, end: &mut StreamEnd) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();

    for line in event.lines() {
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            continue;
        };

        if data == "[DONE]" {
            chunks.push(StreamChunk::Done {
                finish_reason: end.finish_reason.take().unwrap_or(FinishReason::Stop),
                usage: end.usage.take(),
            });
            continue;
        }

        let Ok(chunk) = serde_json::from_str::<OpenAIStreamChunk>(data) else {
            debug!(data, "skipping unparseable SSE payload");
            continue;
        };

        if let Some(u) = chunk.usage {
            end.usage = Some(Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    chunks.push(StreamChunk::Text(content.clone()));
                }
            }

            if let Some(reason) = &choice.finish_reason {
                end.finish_reason = Some(FinishReason::from_wire(reason));
            }
        }
    }

    chunks
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
    stream_options: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

impl From<ChatMessage> for OpenAIMessage {
    fn from(msg: ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().into(),
            content: msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    content: Option<String>,
}
