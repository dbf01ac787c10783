//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_VOICE_ID: &str = "en-US-natalie";
pub const DEFAULT_VOICE_STYLE: &str = "Conversational";

/// Top-level Parley configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<KeysConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Seconds a client has to send its `config` frame after connecting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_secs: Option<u64>,

    /// Allowed CORS origins for the HTTP endpoints. Empty allows any.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Server-side default API keys. Clients may override each one in their
/// handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assemblyai: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assemblyai_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub murf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub murf_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tavily: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tavily_env: Option<String>,
}

impl KeysConfig {
    pub fn resolve_gemini(&self) -> Option<String> {
        resolve_with_default_env(&self.gemini, &self.gemini_env, "GEMINI_API_KEY")
    }

    pub fn resolve_assemblyai(&self) -> Option<String> {
        resolve_with_default_env(&self.assemblyai, &self.assemblyai_env, "ASSEMBLYAI_API_KEY")
    }

    pub fn resolve_murf(&self) -> Option<String> {
        resolve_with_default_env(&self.murf, &self.murf_env, "MURF_API_KEY")
    }

    pub fn resolve_weather(&self) -> Option<String> {
        resolve_with_default_env(&self.weather, &self.weather_env, "WEATHER_API_KEY")
    }

    pub fn resolve_tavily(&self) -> Option<String> {
        resolve_with_default_env(&self.tavily, &self.tavily_env, "TAVILY_API_KEY")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Replaces the built-in assistant persona.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Tool round-trips allowed per turn before the model must answer in text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_rounds: Option<u32>,

    /// Override the generation API base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Sample rate of the PCM the client streams (default: 16000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_sample_rate: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_style: Option<String>,

    /// Synthesis output sample rate (default: 44100).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_sample_rate: Option<u32>,

    /// Synthesis output format (default: "MP3").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    /// Ceiling on waiting for a turn's audio to finish (default: 60).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-call timeout for tool handlers (default: 15).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "parley_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

fn resolve_with_default_env(
    direct: &Option<String>,
    env_var: &Option<String>,
    default_env: &str,
) -> Option<String> {
    resolve_secret_field(direct, env_var)
        .or_else(|| std::env::var(default_env).ok().filter(|v| !v.is_empty()))
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").unwrap_or_else(|e| panic!("invalid env pattern: {e}"))
    });
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::ParleyError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::ParleyError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn handshake_timeout(&self) -> Duration {
        let secs = self
            .gateway
            .as_ref()
            .and_then(|g| g.handshake_timeout_secs)
            .unwrap_or(10);
        Duration::from_secs(secs)
    }

    pub fn cors_origins(&self) -> &[String] {
        self.gateway
            .as_ref()
            .map(|g| g.cors_origins.as_slice())
            .unwrap_or(&[])
    }

    /// Server-side key defaults (empty section when unset; env fallbacks still apply).
    pub fn keys(&self) -> KeysConfig {
        self.keys.clone().unwrap_or_default()
    }

    pub fn model(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn persona(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.persona.as_deref())
    }

    pub fn max_tokens(&self) -> u32 {
        self.agent.as_ref().and_then(|a| a.max_tokens).unwrap_or(1024)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.agent.as_ref().and_then(|a| a.temperature)
    }

    pub fn max_tool_rounds(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_tool_rounds)
            .unwrap_or(5)
    }

    pub fn generation_base_url(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.base_url.as_deref())
    }

    pub fn input_sample_rate(&self) -> u32 {
        self.speech
            .as_ref()
            .and_then(|s| s.input_sample_rate)
            .unwrap_or(16_000)
    }

    pub fn voice_id(&self) -> String {
        self.speech
            .as_ref()
            .and_then(|s| s.voice_id.clone())
            .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string())
    }

    pub fn voice_style(&self) -> String {
        self.speech
            .as_ref()
            .and_then(|s| s.voice_style.clone())
            .unwrap_or_else(|| DEFAULT_VOICE_STYLE.to_string())
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.speech
            .as_ref()
            .and_then(|s| s.output_sample_rate)
            .unwrap_or(44_100)
    }

    pub fn output_format(&self) -> String {
        self.speech
            .as_ref()
            .and_then(|s| s.output_format.clone())
            .unwrap_or_else(|| "MP3".to_string())
    }

    pub fn synthesis_timeout(&self) -> Duration {
        let secs = self
            .speech
            .as_ref()
            .and_then(|s| s.synthesis_timeout_secs)
            .unwrap_or(60);
        Duration::from_secs(secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        let secs = self
            .tools
            .as_ref()
            .and_then(|t| t.timeout_secs)
            .unwrap_or(15);
        Duration::from_secs(secs)
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "agent.model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let keys = self.keys();
        for (name, value) in [
            ("gemini", keys.resolve_gemini()),
            ("assemblyai", keys.resolve_assemblyai()),
            ("murf", keys.resolve_murf()),
        ] {
            if value.is_none() {
                warnings.push(format!(
                    "No server default for '{name}' key; clients must supply it"
                ));
            }
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if gw.handshake_timeout_secs == Some(0) {
                errors.push("gateway.handshake_timeout_secs must be positive".to_string());
            }
        }

        if self.max_tool_rounds() == 0 {
            warnings.push("agent.max_tool_rounds is 0; tools are disabled".to_string());
        }

        if self.synthesis_timeout().is_zero() {
            errors.push("speech.synthesis_timeout_secs must be positive".to_string());
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                errors.push(format!("Unknown logging.format '{}'", logging.format));
            }
            if !matches!(logging.output.as_str(), "stderr" | "stdout") {
                errors.push(format!("Unknown logging.output '{}'", logging.output));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Parley data: `~/.parley/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}
