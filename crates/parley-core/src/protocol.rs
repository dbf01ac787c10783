//! Client wire protocol.
//!
//! The client talks to the gateway over one WebSocket carrying JSON control
//! frames in both directions plus binary PCM audio frames upstream.

use serde::{Deserialize, Serialize};

/// Client -> Server control frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake carrying per-session API keys. Must be the first frame.
    Config {
        #[serde(default)]
        keys: ClientKeys,
    },
    /// Keep-alive.
    Ping,
}

/// API keys a client may supply. Any key left empty falls back to the
/// server-side default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assemblyai: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub murf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily: Option<String>,
}

/// Server -> Client control frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Status { message: String },
    Error { message: String },
    Transcription { text: String, end_of_turn: bool },
    /// Incremental preview of the generated response text.
    LlmChunk { data: String },
    AudioStart,
    /// Base64-encoded audio payload.
    Audio { data: String },
    AudioEnd,
    /// A new user turn pre-empted the response; stop local playback.
    AudioInterrupt,
    Pong,
    /// Timer side effect delegated to the client.
    StartTimer { duration_seconds: u64 },
}

impl ServerFrame {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the frame, as found in its `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::Transcription { .. } => "transcription",
            Self::LlmChunk { .. } => "llm_chunk",
            Self::AudioStart => "audio_start",
            Self::Audio { .. } => "audio",
            Self::AudioEnd => "audio_end",
            Self::AudioInterrupt => "audio_interrupt",
            Self::Pong => "pong",
            Self::StartTimer { .. } => "start_timer",
        }
    }
}

/// Envelope queued to a connection's writer task.
///
/// Frames produced by a pipeline task carry its id. A `Fence` raises the
/// writer's floor: any later-dequeued frame from a task with a lower id is
/// discarded, so nothing a cancelled task queued can follow the interrupt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame {
        task: Option<u64>,
        frame: ServerFrame,
    },
    Fence {
        floor: u64,
    },
    Close,
}

impl Outbound {
    /// A frame not tied to any pipeline task.
    pub fn session(frame: ServerFrame) -> Self {
        Self::Frame { task: None, frame }
    }
}
