//! Language-generation provider abstraction.
//!
//! A provider turns conversation history plus optional tool declarations into
//! a stream of [`CompletionChunk`]s: incremental text, or a structured tool
//! call the caller is expected to execute before resubmitting.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use parley_core::session::Turn;

pub mod google;
pub mod sse;

/// A request to the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub tools: Option<Vec<serde_json::Value>>,
    pub system: Option<String>,
}

/// One streamed event from the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionChunk {
    /// Incremental response text.
    Text { text: String },
    /// The model wants a tool run before it continues.
    ToolCall {
        name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },
    /// Generation finished with the given provider reason.
    Stop { reason: String },
}

/// Tool declaration offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<CompletionChunk>> + Send>>;

/// Failures a caller may want to tell apart from generic transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key rejected by {provider}: {message}")]
    Unauthorized { provider: String, message: String },

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },
}

/// The core language-generation provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "google").
    fn id(&self) -> &str;

    /// Convert conversation history into the provider's message format.
    fn format_messages(&self, history: &[Turn]) -> Vec<serde_json::Value>;

    /// Convert tool declarations into the provider's format.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value>;

    /// Stream a chat completion.
    async fn stream(&self, request: &CompletionRequest, api_key: &str)
    -> anyhow::Result<ChunkStream>;
}
