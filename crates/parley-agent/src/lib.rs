//! Conversation turn handling.
//!
//! The [`TurnBuffer`] decides which recognizer events are real user turns;
//! [`pipeline::spawn_pipeline`] then runs one turn end to end (generation,
//! tool rounds, sentence-by-sentence synthesis) as a cancellable task whose
//! new history is handed back in a single [`PipelineOutcome`].

use std::time::Duration;

use parley_media::MediaError;
use parley_providers::ProviderError;

pub mod pipeline;
pub mod prompt;
pub mod segmenter;
pub mod turn_buffer;

pub use pipeline::{
    PipelineHandle, PipelineOutcome, PipelineSettings, Services, TurnReport, TurnRequest,
    spawn_pipeline,
};
pub use segmenter::SentenceSegmenter;
pub use turn_buffer::{TurnBuffer, TurnDecision};

/// Why a turn ended without committing history.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("turn was cancelled")]
    Cancelled,

    #[error("language model rejected the API key")]
    GenerationUnauthorized,

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("speech synthesis rejected the API key")]
    SynthesisUnauthorized,

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("speech synthesis timed out after {0:?}")]
    SynthesisTimeout(Duration),
}

impl PipelineError {
    pub fn from_generation(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ProviderError>() {
            Some(ProviderError::Unauthorized { .. }) => Self::GenerationUnauthorized,
            _ => Self::Generation(format!("{err:#}")),
        }
    }

    pub fn from_synthesis(err: anyhow::Error) -> Self {
        if MediaError::is_unauthorized(&err) {
            Self::SynthesisUnauthorized
        } else {
            Self::Synthesis(format!("{err:#}"))
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Text for the client's `error` frame.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Cancelled => "The response was interrupted.",
            Self::GenerationUnauthorized => {
                "Invalid or expired Gemini API key. Please check your settings."
            }
            Self::SynthesisUnauthorized => {
                "Invalid or expired Murf.ai API key. Please check your settings."
            }
            Self::SynthesisTimeout(_) => "The voice service took too long to respond.",
            Self::Generation(_) | Self::Synthesis(_) => "An unexpected error occurred.",
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::GenerationUnauthorized | Self::Generation(_) => "generation",
            Self::SynthesisUnauthorized | Self::Synthesis(_) => "synthesis",
            Self::SynthesisTimeout(_) => "synthesis_timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_classification() {
        let err = anyhow::Error::new(ProviderError::Unauthorized {
            provider: "google".into(),
            message: "API_KEY_INVALID".into(),
        });
        assert_eq!(PipelineError::from_generation(err), PipelineError::GenerationUnauthorized);

        let err = anyhow::anyhow!("connection reset");
        assert!(matches!(
            PipelineError::from_generation(err),
            PipelineError::Generation(msg) if msg.contains("connection reset")
        ));
    }

    #[test]
    fn test_synthesis_error_classification() {
        let err = anyhow::Error::new(MediaError::Unauthorized { service: "Murf" });
        let err = PipelineError::from_synthesis(err);
        assert_eq!(err, PipelineError::SynthesisUnauthorized);
        assert!(err.user_message().contains("Murf.ai"));
        assert_eq!(err.kind(), "synthesis");
    }
}
