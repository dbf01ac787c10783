//! Streaming speech recognition (AssemblyAI v3 realtime).
//!
//! Raw PCM goes up as binary frames; the service answers with `Turn`
//! messages carrying the running transcript and end-of-turn flags.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify_connect_error;

const DEFAULT_URL: &str = "wss://streaming.assemblyai.com/v3/ws";

/// One transcript update from the recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub transcript: String,
    pub end_of_turn: bool,
    /// Punctuation and casing applied.
    pub turn_is_formatted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Transcript(TranscriptEvent),
    /// The stream failed; no further events follow.
    Error(String),
    /// The service ended the stream.
    Closed,
}

/// Handle for feeding audio into a recognition stream.
pub struct RecognitionHandle {
    /// Send raw audio bytes (16-bit PCM, mono).
    pub audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Cancel to terminate the stream.
    pub cancel: CancellationToken,
}

impl RecognitionHandle {
    /// Queue an audio frame. Returns false once the stream is gone.
    pub fn send_audio(&self, bytes: Vec<u8>) -> bool {
        self.audio_tx.send(bytes).is_ok()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RecognitionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a recognition stream for PCM at `sample_rate`.
    async fn connect(
        &self,
        api_key: &str,
        sample_rate: u32,
    ) -> anyhow::Result<(RecognitionHandle, mpsc::UnboundedReceiver<RecognitionEvent>)>;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamingMessage {
    Begin {
        #[serde(default)]
        id: String,
    },
    Turn {
        #[serde(default)]
        transcript: String,
        #[serde(default)]
        end_of_turn: bool,
        #[serde(default)]
        turn_is_formatted: bool,
    },
    Termination,
    #[serde(other)]
    Unknown,
}

/// AssemblyAI realtime recognizer.
pub struct AssemblyAiRecognizer {
    url: String,
}

impl AssemblyAiRecognizer {
    pub fn new(url: Option<&str>) -> Self {
        Self {
            url: url.unwrap_or(DEFAULT_URL).to_string(),
        }
    }

    fn stream_url(&self, sample_rate: u32) -> String {
        format!("{}?sample_rate={sample_rate}&format_turns=true", self.url)
    }
}

impl Default for AssemblyAiRecognizer {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Decode one text frame from the service.
fn decode_message(text: &str) -> Option<RecognitionEvent> {
    match serde_json::from_str::<StreamingMessage>(text) {
        Ok(StreamingMessage::Turn {
            transcript,
            end_of_turn,
            turn_is_formatted,
        }) => Some(RecognitionEvent::Transcript(TranscriptEvent {
            transcript,
            end_of_turn,
            turn_is_formatted,
        })),
        Ok(StreamingMessage::Begin { id }) => {
            debug!(session = %id, "Recognition session began");
            None
        }
        Ok(StreamingMessage::Termination) => Some(RecognitionEvent::Closed),
        Ok(StreamingMessage::Unknown) => None,
        Err(e) => {
            warn!(%e, "Unparseable recognition message");
            None
        }
    }
}

#[async_trait]
impl SpeechRecognizer for AssemblyAiRecognizer {
    async fn connect(
        &self,
        api_key: &str,
        sample_rate: u32,
    ) -> anyhow::Result<(RecognitionHandle, mpsc::UnboundedReceiver<RecognitionEvent>)> {
        let mut request = self.stream_url(sample_rate).into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", HeaderValue::from_str(api_key)?);

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| classify_connect_error("AssemblyAI", e))?;
        info!(sample_rate, "Connected to recognition service");

        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<RecognitionEvent>();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let (mut ws_tx, mut ws_rx) = ws.split();
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        let terminate = serde_json::json!({ "type": "Terminate" }).to_string();
                        let _ = ws_tx.send(Message::Text(terminate.into())).await;
                        let _ = ws_tx.close().await;
                        break;
                    }
                    Some(bytes) = audio_rx.recv() => {
                        if let Err(e) = ws_tx.send(Message::Binary(bytes.into())).await {
                            let _ = event_tx.send(RecognitionEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = decode_message(&text) {
                                let closed = event == RecognitionEvent::Closed;
                                if event_tx.send(event).is_err() || closed {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Recognition service closed the stream");
                            let _ = event_tx.send(RecognitionEvent::Closed);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = event_tx.send(RecognitionEvent::Error(e.to_string()));
                            break;
                        }
                        None => {
                            let _ = event_tx.send(RecognitionEvent::Closed);
                            break;
                        }
                    },
                }
            }
            debug!("Recognition stream task ended");
        });

        Ok((RecognitionHandle { audio_tx, cancel }, event_rx))
    }
}
