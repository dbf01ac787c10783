//! Tools the voice assistant can invoke mid-turn.
//!
//! Each tool is a variant of [`ToolCall`] with typed arguments. The
//! [`ToolDispatcher`] parses a model-issued call, runs the handler under a
//! timeout, and always answers with a [`ToolOutput`]: handler failures are
//! reported as text the model can speak, never as errors to the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use parley_core::session::SessionKeys;
use parley_providers::ToolDefinition;

pub mod calculator;
pub mod timer;
pub mod weather;
pub mod web_search;

/// Text returned for a tool name nobody registered.
pub const UNKNOWN_TOOL_TEXT: &str = "I don't have that capability.";

/// A side effect the client should carry out alongside the tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEffect {
    StartTimer { duration_seconds: u64 },
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<ClientEffect>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            effect: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            effect: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0} is not configured for this session")]
    MissingKey(&'static str),

    #[error("{service} rejected the API key")]
    Unauthorized { service: &'static str },

    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::Upstream {
            service: "http",
            message: e.to_string(),
        }
    }
}

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    Calculate {
        expression: String,
    },
    SetTimer {
        #[serde(deserialize_with = "timer::deserialize_duration")]
        duration: f64,
        #[serde(default = "timer::default_units")]
        units: String,
    },
    GetWeather {
        location: String,
    },
    WebSearch {
        query: String,
    },
}

/// Every tool name the dispatcher understands.
pub const TOOL_NAMES: [&str; 4] = ["calculate", "set_timer", "get_weather", "web_search"];

impl ToolCall {
    /// Parse a call as issued by the model. `Ok(None)` means the name is
    /// not a known tool.
    pub fn parse(
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<Self>, ToolError> {
        if !TOOL_NAMES.contains(&name) {
            return Ok(None);
        }
        let tagged = serde_json::json!({ "name": name, "arguments": arguments });
        serde_json::from_value(tagged)
            .map(Some)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Calculate { .. } => "calculate",
            ToolCall::SetTimer { .. } => "set_timer",
            ToolCall::GetWeather { .. } => "get_weather",
            ToolCall::WebSearch { .. } => "web_search",
        }
    }
}

/// Runs tool calls for the generation pipeline.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools offered to the model for a session with these keys.
    fn definitions(&self, keys: &SessionKeys) -> Vec<ToolDefinition>;

    /// Run one call. Never fails: problems come back as error text.
    async fn dispatch(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
        keys: &SessionKeys,
    ) -> ToolOutput;
}

/// Upstream endpoints, overridable for tests.
#[derive(Debug, Clone)]
pub struct ToolEndpoints {
    pub weather_url: String,
    pub search_url: String,
}

impl Default for ToolEndpoints {
    fn default() -> Self {
        Self {
            weather_url: weather::DEFAULT_URL.to_string(),
            search_url: web_search::DEFAULT_URL.to_string(),
        }
    }
}

/// The built-in tool set.
pub struct ToolDispatcher {
    client: reqwest::Client,
    timeout: Duration,
    endpoints: ToolEndpoints,
}

impl ToolDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoints(timeout, ToolEndpoints::default())
    }

    pub fn with_endpoints(timeout: Duration, endpoints: ToolEndpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            endpoints,
        }
    }

    async fn run(&self, call: ToolCall, keys: &SessionKeys) -> Result<ToolOutput, ToolError> {
        match call {
            ToolCall::Calculate { expression } => Ok(calculator::run(&expression)),
            ToolCall::SetTimer { duration, units } => timer::run(duration, &units),
            ToolCall::GetWeather { location } => {
                let key = keys
                    .weather
                    .as_deref()
                    .ok_or(ToolError::MissingKey("Weather API key"))?;
                weather::current(&self.client, &self.endpoints.weather_url, key, &location)
                    .await
                    .map(ToolOutput::text)
            }
            ToolCall::WebSearch { query } => {
                let key = keys
                    .tavily
                    .as_deref()
                    .ok_or(ToolError::MissingKey("Search API key"))?;
                web_search::search(&self.client, &self.endpoints.search_url, key, &query)
                    .await
                    .map(ToolOutput::text)
            }
        }
    }
}

/// Turn a handler failure into something the assistant can say.
fn failure_text(tool: &str, err: &ToolError) -> String {
    match err {
        ToolError::Unauthorized { service } => format!(
            "The {service} API key provided is invalid or has expired. Please check it in the settings."
        ),
        ToolError::Timeout(_) => format!("The {tool} tool took too long to respond."),
        ToolError::MissingKey(what) => format!("{what} is not configured for this session."),
        other => format!("The {tool} tool failed: {other}"),
    }
}

#[async_trait]
impl ToolExecutor for ToolDispatcher {
    fn definitions(&self, keys: &SessionKeys) -> Vec<ToolDefinition> {
        let mut defs = vec![calculator::definition(), timer::definition()];
        if keys.weather.is_some() {
            defs.push(weather::definition());
        }
        if keys.tavily.is_some() {
            defs.push(web_search::definition());
        }
        defs
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
        keys: &SessionKeys,
    ) -> ToolOutput {
        let call = match ToolCall::parse(name, arguments) {
            Ok(Some(call)) => call,
            Ok(None) => {
                warn!(tool = name, "Model requested unknown tool");
                return ToolOutput::error(UNKNOWN_TOOL_TEXT);
            }
            Err(e) => {
                warn!(tool = name, %e, "Tool call has invalid arguments");
                return ToolOutput::error(failure_text(name, &e));
            }
        };

        info!(tool = name, "Executing tool");
        let result = match tokio::time::timeout(self.timeout, self.run(call, keys)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        };

        result.unwrap_or_else(|e| {
            warn!(tool = name, %e, "Tool failed");
            ToolOutput::error(failure_text(name, &e))
        })
    }
}
