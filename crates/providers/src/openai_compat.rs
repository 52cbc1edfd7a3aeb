//! OpenAI-compatible provider implementation.
//!
//! Works with: vLLM, llama.cpp server, Ollama, LM Studio, OpenAI, and any
//! endpoint exposing a streaming `/v1/chat/completions`.
//!
//! Supports:
//! - Streaming SSE chat completions
//! - Out-of-band reasoning deltas (`reasoning_content` / `reasoning`)
//! - Native tool calling, assembled from incremental deltas
//! - Model listing and health checks

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use jarvis_core::error::ProviderError;
use jarvis_core::message::{Message, ToolCallRequest, generate_call_id};
use jarvis_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An OpenAI-compatible model provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    /// Longest wait for response headers or for the next piece of the body
    idle_timeout: Duration,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self::with_timeout(name, base_url, api_key, Duration::from_secs(120))
    }

    /// Create a provider that gives up once the backend has been silent for
    /// `idle_timeout`. A long generation that keeps streaming is never cut off.
    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        idle_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(idle_timeout))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            idle_timeout,
        }
    }

    /// Create a vLLM provider on its default local port.
    pub fn vllm(base_url: Option<&str>) -> Self {
        Self::new("vllm", base_url.unwrap_or("http://localhost:8000/v1"), "EMPTY")
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), "ollama")
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let content = if m.content.is_empty() && !m.tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                };
                let tool_calls = (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: serde_json::Value::Object(tc.arguments.clone()).to_string(),
                            },
                        })
                        .collect()
                });
                ApiMessage {
                    role: m.role.as_str().into(),
                    content,
                    tool_calls,
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.idle_timeout, send)
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "no response from {} within {}s",
                    self.name,
                    self.idle_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited { retry_after_secs: 5 });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let decoder = SseDecoder::new(self.name.clone());

        // Read the SSE byte stream on its own task; a dropped receiver ends it.
        tokio::spawn(pump(response.bytes_stream(), decoder, tx, self.idle_timeout));

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.idle_timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.idle_timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

/// Forward decoded chunks from an SSE body until it finishes, fails, stays
/// silent for longer than `idle`, or the receiver goes away.
async fn pump<S, B, E>(
    body: S,
    mut decoder: SseDecoder,
    tx: mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
    idle: Duration,
) where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    loop {
        let next = match tokio::time::timeout(idle, body.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!(idle_secs = idle.as_secs(), "Model stream went silent");
                let message = format!("no data from the model for {}s", idle.as_secs());
                let _ = tx.send(Err(ProviderError::Timeout(message))).await;
                return;
            }
        };
        let Some(read) = next else {
            break;
        };
        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        for chunk in decoder.feed(bytes.as_ref()) {
            if tx.send(Ok(chunk)).await.is_err() {
                trace!("Stream receiver dropped, stopping");
                return;
            }
        }
        if decoder.is_finished() {
            return;
        }
    }

    // Body ended without [DONE] or a finish reason
    let _ = tx.send(Ok(decoder.finish())).await;
}

/// Incremental decoder for an SSE chat-completions body.
///
/// Lines are split on raw bytes so a multi-byte character cut across two
/// network reads is decoded only once the line is complete.
struct SseDecoder {
    provider: String,
    buffer: Vec<u8>,
    accumulators: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl SseDecoder {
    fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            buffer: Vec::new(),
            accumulators: BTreeMap::new(),
            finished: false,
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume raw bytes and return the chunks they complete.
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                out.push(self.finish());
                return out;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(stream_resp) => {
                    let finish_reason = stream_resp
                        .choices
                        .first()
                        .and_then(|c| c.finish_reason.clone());
                    if let Some(chunk) = self.apply(stream_resp) {
                        out.push(chunk);
                    }
                    if let Some(reason) = finish_reason {
                        trace!(provider = %self.provider, %reason, "Choice finished");
                        out.push(self.finish());
                        return out;
                    }
                }
                Err(e) => {
                    trace!(
                        provider = %self.provider,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }
        out
    }

    /// Fold one parsed SSE payload into state; return a chunk if it carries text.
    fn apply(&mut self, resp: StreamResponse) -> Option<StreamChunk> {
        let choice = resp.choices.into_iter().next()?;
        let delta = choice.delta;

        for tc_delta in delta.tool_calls.unwrap_or_default() {
            let acc = self.accumulators.entry(tc_delta.index).or_default();
            if let Some(id) = tc_delta.id {
                acc.id = id;
            }
            if let Some(func) = tc_delta.function {
                if let Some(name) = func.name.filter(|n| !n.is_empty()) {
                    acc.name = name;
                }
                if let Some(args) = func.arguments {
                    acc.arguments.push_str(&args);
                }
            }
        }

        let text = delta.content.filter(|c| !c.is_empty());
        let reasoning = delta.reasoning_content.filter(|c| !c.is_empty());
        if text.is_none() && reasoning.is_none() {
            return None;
        }
        Some(StreamChunk {
            text,
            reasoning,
            ..StreamChunk::default()
        })
    }

    /// Emit the terminal chunk carrying every assembled native tool call.
    fn finish(&mut self) -> StreamChunk {
        self.finished = true;
        let accumulators = std::mem::take(&mut self.accumulators);
        let tool_calls = accumulators
            .into_values()
            .filter_map(|acc| acc.into_request(&self.provider))
            .collect();
        StreamChunk {
            tool_calls,
            done: true,
            ..StreamChunk::default()
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    /// Canonicalize into a request; `None` when the payload is unusable.
    fn into_request(self, provider: &str) -> Option<ToolCallRequest> {
        if self.name.is_empty() {
            warn!(provider, "Dropping native tool call without a name");
            return None;
        }
        let arguments = match self.arguments.trim() {
            "" => serde_json::Map::new(),
            raw => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(other) => {
                    warn!(provider, tool = %self.name, args = %other, "Dropping native tool call with non-object arguments");
                    return None;
                }
                Err(e) => {
                    warn!(provider, tool = %self.name, error = %e, "Dropping native tool call with malformed arguments");
                    return None;
                }
            },
        };
        let id = if self.id.is_empty() { generate_call_id() } else { self.id };
        Some(ToolCallRequest {
            id,
            name: self.name,
            arguments,
        })
    }
}
