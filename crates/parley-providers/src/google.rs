//! Google Generative AI (Gemini) provider.
//!
//! Implements streaming via the `streamGenerateContent` endpoint with SSE.
//! Auth is via API key in query parameter.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use parley_core::session::{Turn, TurnContent};

use crate::sse::{SseEvent, parse_sse_response};
use crate::{ChunkStream, CompletionChunk, CompletionRequest, LlmProvider, ProviderError, ToolDefinition};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

// --- Gemini request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCallPart>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPart {
    name: String,
    #[serde(default)]
    args: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Decode one SSE `data:` payload into zero or more chunks, in part order.
fn decode_event(data: &str) -> Vec<CompletionChunk> {
    let chunk: GeminiStreamChunk = match serde_json::from_str(data.trim()) {
        Ok(c) => c,
        Err(e) => {
            trace!(%e, "Failed to parse Gemini chunk");
            return Vec::new();
        }
    };

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    if let Some(content) = candidate.content {
        for part in content.parts {
            if let Some(fc) = part.function_call {
                out.push(CompletionChunk::ToolCall {
                    name: fc.name,
                    arguments: fc.args.unwrap_or_default(),
                });
            } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                out.push(CompletionChunk::Text { text });
            }
        }
    }
    if let Some(reason) = candidate.finish_reason {
        out.push(CompletionChunk::Stop { reason });
    }
    out
}

/// Map a non-success HTTP response to a typed provider error.
fn classify_error(status: u16, body: String) -> ProviderError {
    let invalid_key = body.contains("API_KEY_INVALID") || body.contains("API key not valid");
    if status == 401 || status == 403 || invalid_key {
        ProviderError::Unauthorized {
            provider: "google".into(),
            message: body,
        }
    } else {
        ProviderError::Api {
            provider: "google".into(),
            status,
            body,
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        // Gemini wraps tools in a single object with function_declarations array
        let declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema,
                })
            })
            .collect();

        vec![json!({ "function_declarations": declarations })]
    }

    fn format_messages(&self, history: &[Turn]) -> Vec<serde_json::Value> {
        history
            .iter()
            .map(|turn| match &turn.content {
                TurnContent::Text { text } => {
                    let role = match turn.role {
                        parley_core::session::Role::Model => "model",
                        _ => "user",
                    };
                    json!({ "role": role, "parts": [{ "text": text }] })
                }
                TurnContent::ToolCall { name, arguments } => json!({
                    "role": "model",
                    "parts": [{ "functionCall": { "name": name, "args": arguments } }]
                }),
                TurnContent::ToolResult { name, result } => json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": { "result": result }
                        }
                    }]
                }),
            })
            .collect()
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        api_key: &str,
    ) -> anyhow::Result<ChunkStream> {
        let system_instruction = request.system.as_ref().map(|s| {
            json!({
                "parts": [{ "text": s }]
            })
        });

        let tool_config = request
            .tools
            .as_ref()
            .map(|_| json!({ "functionCallingConfig": { "mode": "AUTO" } }));

        let body = GeminiRequest {
            contents: request.messages.clone(),
            system_instruction,
            tools: request.tools.clone(),
            tool_config,
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(request.max_tokens),
                temperature: request.temperature,
            }),
        };

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );

        debug!(model = %request.model, messages = request.messages.len(), "Streaming Gemini API");

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, body).into());
        }

        let sse_stream = parse_sse_response(response);

        let chunk_stream = futures::stream::unfold(
            GeminiChunkState {
                sse: Box::pin(sse_stream),
                pending: VecDeque::new(),
            },
            |mut state| async move {
                loop {
                    if let Some(chunk) = state.pending.pop_front() {
                        return Some((Ok(chunk), state));
                    }
                    match state.sse.next().await {
                        Some(Ok(event)) => state.pending.extend(decode_event(&event.data)),
                        Some(Err(e)) => return Some((Err(e), state)),
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(chunk_stream))
    }
}

struct GeminiChunkState {
    sse: Pin<Box<dyn Stream<Item = anyhow::Result<SseEvent>> + Send>>,
    pending: VecDeque<CompletionChunk>,
}
