//! Anthropic Claude provider implementation

use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or("https://api.anthropic.com/v1")
    }

    fn build_request(&self, request: CompletionRequest) -> AnthropicRequest {
        let model = request
            .model
            .unwrap_or_else(|| self.default_model().to_string());

        // Anthropic takes the system prompt out of band
        let mut system = None;
        let mut messages = Vec::new();
        for msg in request.messages {
            if msg.role == Role::System {
                system = Some(msg.content);
            } else {
                messages.push(AnthropicMessage::from(msg));
            }
        }

        AnthropicRequest {
            model,
            messages,
            system,
            max_tokens: request.max_tokens.unwrap_or(4096),
            temperature: request.temperature,
            stream: true,
            stop_sequences: request.stop,
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("claude-sonnet-4-20250514")
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamReceiver, ProviderError> {
        let api_request = self.build_request(request);
        debug!(model = %api_request.model, messages = api_request.messages.len(), "anthropic stream request");

        let api_key = self.config.api_key.as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ProviderError::AuthenticationFailed)?;

        let mut req = self.client
            .post(format!("{}/messages", self.base_url()))
            .header("x-api-key", api_key)
            .header("content-type", "application/json")
            .json(&api_request);

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req.send().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text, None));
        }

        // Create async stream from SSE response
        let stream = async_stream::stream! {
            use futures_util::StreamExt;

            let mut byte_stream = response.bytes_stream();
            let mut buffer = SseBuffer::default();
            let mut prompt_tokens = 0;

            while let Some(chunk_result) = byte_stream.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push(&bytes);

                        while let Some(event) = buffer.next_event() {
                            match parse_sse_event(&event, &mut prompt_tokens) {
                                Some(chunk @ StreamChunk::Done { .. }) => {
                                    yield chunk;
                                    return;
                                }
                                Some(chunk) => yield chunk,
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield StreamChunk::Error(e.to_string());
                        return;
                    }
                }
            }
        };

        Ok(StreamReceiver::new(stream))
    }
}

/// Translate one SSE event into a stream chunk.
///
/// `prompt_tokens` carries the input token count from `message_start` to the
/// final `message_delta`.
fn parse_sse_event(event: &str, prompt_tokens: &mut usize) -> Option<StreamChunk> {
    let mut event_type = None;
    let mut event_data = None;

    for line in event.lines() {
        if let Some(t) = line.strip_prefix("event:") {
            event_type = Some(t.trim());
        } else if let Some(d) = line.strip_prefix("data:") {
            event_data = Some(d.trim());
        }
    }

    let (etype, data) = (event_type?, event_data?);
    match etype {
        "message_start" => {
            if let Ok(start) = serde_json::from_str::<MessageStart>(data) {
                *prompt_tokens = start.message.usage.input_tokens;
            }
            None
        }
        "content_block_delta" => {
            let delta = serde_json::from_str::<ContentBlockDelta>(data).ok()?;
            match delta.delta {
                DeltaContent::TextDelta { text } => Some(StreamChunk::Text(text)),
                DeltaContent::Other => None,
            }
        }
        "message_delta" => {
            let delta = serde_json::from_str::<MessageDelta>(data).ok()?;
            let reason = delta.delta.stop_reason?;
            let usage = delta.usage.map(|u| Usage {
                prompt_tokens: *prompt_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: *prompt_tokens + u.output_tokens,
            });
            Some(StreamChunk::Done {
                finish_reason: FinishReason::from_wire(&reason),
                usage,
            })
        }
        "message_stop" => Some(StreamChunk::Done {
            finish_reason: FinishReason::Stop,
            usage: None,
        }),
        "error" => Some(StreamChunk::Error(data.to_string())),
        _ => None,
    }
}

// ============================================================================
// Anthropic API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

impl From<ChatMessage> for AnthropicMessage {
    fn from(msg: ChatMessage) -> Self {
        let role = match msg.role {
            Role::User | Role::System => "user",
            Role::Assistant => "assistant",
        };

        Self {
            role: role.into(),
            content: msg.content,
        }
    }
}

// Streaming types
#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartBody,
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    usage: StartUsage,
}

#[derive(Debug, Deserialize)]
struct StartUsage {
    input_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeltaContent {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaContent {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: usize,
}
