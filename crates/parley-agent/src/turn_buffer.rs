//! Decides which recognizer events become conversation turns.

use parley_media::TranscriptEvent;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    /// Partial, unformatted or empty: nothing to do.
    Interim,
    /// A finished user turn, trimmed.
    Final(String),
    /// Same text as the previous final turn.
    Duplicate,
}

/// Emits a final turn only for formatted end-of-turn transcripts, dropping
/// immediate repeats. Comparison is exact on the trimmed text, so a
/// deliberate repeat of the same sentence is also dropped.
#[derive(Debug, Default)]
pub struct TurnBuffer {
    last_final: Option<String>,
}

impl TurnBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, event: &TranscriptEvent) -> TurnDecision {
        if !(event.end_of_turn && event.turn_is_formatted) {
            return TurnDecision::Interim;
        }
        let text = event.transcript.trim();
        if text.is_empty() {
            return TurnDecision::Interim;
        }
        if self.last_final.as_deref() == Some(text) {
            debug!(text, "Dropping duplicate final transcript");
            return TurnDecision::Duplicate;
        }
        self.last_final = Some(text.to_string());
        TurnDecision::Final(text.to_string())
    }

    pub fn last_final(&self) -> Option<&str> {
        self.last_final.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str, end_of_turn: bool, formatted: bool) -> TranscriptEvent {
        TranscriptEvent {
            transcript: text.into(),
            end_of_turn,
            turn_is_formatted: formatted,
        }
    }

    #[test]
    fn test_only_formatted_end_of_turn_is_final() {
        let mut buffer = TurnBuffer::new();
        assert_eq!(buffer.accept(&event("what's the", false, false)), TurnDecision::Interim);
        assert_eq!(
            buffer.accept(&event("what's the weather", true, false)),
            TurnDecision::Interim
        );
        assert_eq!(
            buffer.accept(&event(" What's the weather? ", true, true)),
            TurnDecision::Final("What's the weather?".into())
        );
        assert_eq!(buffer.last_final(), Some("What's the weather?"));
    }

    #[test]
    fn test_blank_final_is_ignored() {
        let mut buffer = TurnBuffer::new();
        assert_eq!(buffer.accept(&event("   ", true, true)), TurnDecision::Interim);
        assert_eq!(buffer.last_final(), None);
    }

    #[test]
    fn test_back_to_back_duplicate_dropped() {
        let mut buffer = TurnBuffer::new();
        assert!(matches!(buffer.accept(&event("Hello.", true, true)), TurnDecision::Final(_)));
        assert_eq!(buffer.accept(&event("Hello. ", true, true)), TurnDecision::Duplicate);
        assert!(matches!(buffer.accept(&event("Bye.", true, true)), TurnDecision::Final(_)));
        // Only the immediately preceding turn counts.
        assert!(matches!(buffer.accept(&event("Hello.", true, true)), TurnDecision::Final(_)));
    }
}
