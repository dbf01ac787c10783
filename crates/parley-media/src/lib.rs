//! Media clients: streaming speech recognition and speech synthesis.
//!
//! Both directions are long-lived WebSocket sessions to external services.
//! Each is exposed as a trait returning a handle plus an event receiver, so
//! the conversation core never touches transport details.

pub mod recognition;
pub mod synthesis;
pub mod voices;

pub use recognition::{
    AssemblyAiRecognizer, RecognitionEvent, RecognitionHandle, SpeechRecognizer, TranscriptEvent,
};
pub use synthesis::{
    AudioChunk, MurfSynthesizer, SpeechSynthesizer, SynthesisAudio, SynthesisBackend, SynthesisSink,
    SynthesisStream, SynthesisText,
};

/// Errors worth surfacing to the user distinctly.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{service} rejected the API key")]
    Unauthorized { service: &'static str },

    #[error("{service} connection failed: {message}")]
    Connect {
        service: &'static str,
        message: String,
    },
}

impl MediaError {
    /// Whether `err` is a rejected credential from any media service.
    pub fn is_unauthorized(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<MediaError>(),
            Some(MediaError::Unauthorized { .. })
        )
    }
}

/// Map a WebSocket handshake failure to a [`MediaError`].
pub(crate) fn classify_connect_error(
    service: &'static str,
    err: tokio_tungstenite::tungstenite::Error,
) -> MediaError {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            MediaError::Unauthorized { service }
        }
        other => MediaError::Connect {
            service,
            message: other.to_string(),
        },
    }
}
