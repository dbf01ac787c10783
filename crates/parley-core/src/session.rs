//! Conversation model: turns, history entries, and per-session credentials.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::KeysConfig;
use crate::error::ParleyError;
use crate::protocol::ClientKeys;

/// Who contributed a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    Tool,
}

/// Payload of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnContent {
    Text {
        text: String,
    },
    ToolCall {
        name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },
    ToolResult {
        name: String,
        result: String,
    },
}

/// One complete conversational contribution. Immutable once in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, TurnContent::Text { text: text.into() })
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, TurnContent::Text { text: text.into() })
    }

    /// The model's request to run a tool.
    pub fn tool_call(
        name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::new(
            Role::Model,
            TurnContent::ToolCall {
                name: name.into(),
                arguments,
            },
        )
    }

    pub fn tool_result(name: impl Into<String>, result: impl Into<String>) -> Self {
        Self::new(
            Role::Tool,
            TurnContent::ToolResult {
                name: name.into(),
                result: result.into(),
            },
        )
    }

    fn new(role: Role, content: TurnContent) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Plain text of a text turn.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self.content, TurnContent::ToolCall { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self.content, TurnContent::ToolResult { .. })
    }
}

/// Credentials resolved for one session: client-supplied keys merged over
/// server defaults. Fixed for the lifetime of the session.
#[derive(Clone)]
pub struct SessionKeys {
    pub gemini: String,
    pub assemblyai: String,
    pub murf: String,
    pub weather: Option<String>,
    pub tavily: Option<String>,
}

/// Keys without which a session cannot run.
pub const ESSENTIAL_KEYS: [&str; 3] = ["gemini", "assemblyai", "murf"];

impl SessionKeys {
    /// Merge client keys over server defaults; fails listing every missing
    /// essential key.
    pub fn resolve(client: &ClientKeys, defaults: &KeysConfig) -> Result<Self, ParleyError> {
        let pick = |client: &Option<String>, fallback: Option<String>| {
            client
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .or(fallback)
        };

        let gemini = pick(&client.gemini, defaults.resolve_gemini());
        let assemblyai = pick(&client.assemblyai, defaults.resolve_assemblyai());
        let murf = pick(&client.murf, defaults.resolve_murf());

        let missing: Vec<String> = [&gemini, &assemblyai, &murf]
            .iter()
            .zip(ESSENTIAL_KEYS)
            .filter(|(key, _)| key.is_none())
            .map(|(_, name)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ParleyError::MissingKeys(missing));
        }

        Ok(Self {
            gemini: gemini.unwrap_or_default(),
            assemblyai: assemblyai.unwrap_or_default(),
            murf: murf.unwrap_or_default(),
            weather: pick(&client.weather, defaults.resolve_weather()),
            tavily: pick(&client.tavily, defaults.resolve_tavily()),
        })
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("gemini", &"<redacted>")
            .field("assemblyai", &"<redacted>")
            .field("murf", &"<redacted>")
            .field("weather", &self.weather.as_ref().map(|_| "<redacted>"))
            .field("tavily", &self.tavily.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_defaults() -> KeysConfig {
        KeysConfig {
            gemini: Some("server-gemini".into()),
            assemblyai: Some("server-aai".into()),
            murf: Some("server-murf".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_client_keys_override_defaults() {
        let client = ClientKeys {
            gemini: Some("client-gemini".into()),
            tavily: Some("client-tavily".into()),
            ..Default::default()
        };
        let keys = SessionKeys::resolve(&client, &server_defaults()).unwrap();
        assert_eq!(keys.gemini, "client-gemini");
        assert_eq!(keys.assemblyai, "server-aai");
        assert_eq!(keys.tavily.as_deref(), Some("client-tavily"));
        assert!(keys.weather.is_none());
    }

    #[test]
    fn test_blank_client_key_falls_back() {
        let client = ClientKeys {
            murf: Some("   ".into()),
            ..Default::default()
        };
        let keys = SessionKeys::resolve(&client, &server_defaults()).unwrap();
        assert_eq!(keys.murf, "server-murf");
    }

    #[test]
    fn test_missing_essential_keys() {
        let client = ClientKeys {
            gemini: Some("g".into()),
            ..Default::default()
        };
        let err = SessionKeys::resolve(&client, &KeysConfig::default()).unwrap_err();
        match err {
            ParleyError::MissingKeys(missing) => {
                assert_eq!(missing, vec!["assemblyai".to_string(), "murf".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_debug_redacts_keys() {
        let keys = SessionKeys::resolve(&ClientKeys::default(), &server_defaults()).unwrap();
        let printed = format!("{keys:?}");
        assert!(!printed.contains("server-gemini"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_turn_constructors() {
        let mut args = serde_json::Map::new();
        args.insert("location".into(), serde_json::json!("Paris"));

        let call = Turn::tool_call("get_weather", args);
        assert_eq!(call.role, Role::Model);
        assert!(call.is_tool_call());
        assert!(call.text().is_none());

        let result = Turn::tool_result("get_weather", "Cloudy");
        assert_eq!(result.role, Role::Tool);
        assert!(result.is_tool_result());

        assert_eq!(Turn::user("hi").text(), Some("hi"));
        assert_eq!(Turn::model("hello").role, Role::Model);
    }

    #[test]
    fn test_turn_serialization() {
        let json = serde_json::to_value(Turn::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"]["type"], "text");
        assert_eq!(json["content"]["text"], "hi");
    }
}
