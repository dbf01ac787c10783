//! Streaming speech synthesis (Murf stream-input WebSocket).
//!
//! A [`SynthesisStream`] accepts text segments tagged with one context id and
//! yields base64 audio chunks in arrival order. The stream ends with a chunk
//! marked `is_final`, or simply by closing when the service hangs up.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::classify_connect_error;

const DEFAULT_URL: &str = "wss://api.murf.ai/v1/speech/stream-input";

/// One piece of synthesized audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Base64-encoded audio, as delivered by the service.
    pub payload: String,
    pub is_final: bool,
}

/// A text segment queued for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisText {
    pub text: String,
    /// Last segment for this context.
    pub end: bool,
}

/// Client side of one synthesis context.
///
/// Dropping the stream (or its [`SynthesisAudio`] half) cancels the
/// underlying connection.
pub struct SynthesisStream {
    sink: SynthesisSink,
    audio: SynthesisAudio,
}

/// Sending half: queues text for one context.
pub struct SynthesisSink {
    context_id: String,
    text_tx: mpsc::UnboundedSender<SynthesisText>,
}

/// Receiving half: audio in arrival order.
pub struct SynthesisAudio {
    events: mpsc::UnboundedReceiver<anyhow::Result<AudioChunk>>,
    _guard: DropGuard,
}

/// Service side of a [`SynthesisStream`], driven by a backend task.
pub struct SynthesisBackend {
    pub context_id: String,
    pub text_rx: mpsc::UnboundedReceiver<SynthesisText>,
    pub audio_tx: mpsc::UnboundedSender<anyhow::Result<AudioChunk>>,
    pub cancel: CancellationToken,
}

impl SynthesisStream {
    /// Create a connected stream/backend pair.
    pub fn channel(context_id: impl Into<String>) -> (Self, SynthesisBackend) {
        let context_id = context_id.into();
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let (audio_tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let stream = Self {
            sink: SynthesisSink {
                context_id: context_id.clone(),
                text_tx,
            },
            audio: SynthesisAudio {
                events,
                _guard: cancel.clone().drop_guard(),
            },
        };
        let backend = SynthesisBackend {
            context_id,
            text_rx,
            audio_tx,
            cancel,
        };
        (stream, backend)
    }

    pub fn context_id(&self) -> &str {
        self.sink.context_id()
    }

    pub fn send(&self, text: &str, end: bool) -> bool {
        self.sink.send(text, end)
    }

    pub async fn next(&mut self) -> Option<anyhow::Result<AudioChunk>> {
        self.audio.next().await
    }

    /// Split into halves so text can be fed while audio is drained.
    pub fn split(self) -> (SynthesisSink, SynthesisAudio) {
        (self.sink, self.audio)
    }
}

impl SynthesisSink {
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Queue a segment. Returns false once the backend is gone.
    pub fn send(&self, text: &str, end: bool) -> bool {
        self.text_tx
            .send(SynthesisText {
                text: text.to_string(),
                end,
            })
            .is_ok()
    }
}

impl SynthesisAudio {
    /// Next audio chunk; `None` once the connection has closed.
    pub async fn next(&mut self) -> Option<anyhow::Result<AudioChunk>> {
        self.events.recv().await
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Open a synthesis context.
    async fn open(&self, api_key: &str, context_id: &str) -> anyhow::Result<SynthesisStream>;
}

#[derive(Debug, Deserialize)]
struct MurfResponse {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default, rename = "final")]
    is_final: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Decode one service message. Messages with neither audio nor a final
/// marker yield nothing.
fn decode_response(text: &str) -> Option<anyhow::Result<AudioChunk>> {
    let response: MurfResponse = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%e, "Unparseable synthesis message");
            return None;
        }
    };
    if let Some(error) = response.error {
        return Some(Err(anyhow::anyhow!("synthesis error: {error}")));
    }
    let payload = response.audio.unwrap_or_default();
    if payload.is_empty() && !response.is_final {
        return None;
    }
    Some(Ok(AudioChunk {
        payload,
        is_final: response.is_final,
    }))
}

/// Murf streaming synthesizer.
pub struct MurfSynthesizer {
    url: String,
    voice_id: String,
    style: String,
    sample_rate: u32,
    format: String,
}

impl MurfSynthesizer {
    pub fn new(voice_id: &str, style: &str, sample_rate: u32, format: &str) -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            voice_id: voice_id.to_string(),
            style: style.to_string(),
            sample_rate,
            format: format.to_string(),
        }
    }

    /// Point at a different endpoint (tests, proxies).
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    fn stream_url(&self, api_key: &str) -> String {
        format!(
            "{}?api-key={api_key}&sample_rate={}&channel_type=MONO&format={}",
            self.url, self.sample_rate, self.format
        )
    }

    fn voice_config(&self, context_id: &str) -> serde_json::Value {
        json!({
            "voice_config": { "voiceId": self.voice_id, "style": self.style },
            "context_id": context_id,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for MurfSynthesizer {
    async fn open(&self, api_key: &str, context_id: &str) -> anyhow::Result<SynthesisStream> {
        let (ws, _) = tokio_tungstenite::connect_async(self.stream_url(api_key))
            .await
            .map_err(|e| classify_connect_error("Murf", e))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        ws_tx
            .send(Message::Text(self.voice_config(context_id).to_string().into()))
            .await?;
        info!(voice = %self.voice_id, context_id, "Connected to synthesis service");

        let (stream, backend) = SynthesisStream::channel(context_id);
        let SynthesisBackend {
            context_id,
            mut text_rx,
            audio_tx,
            cancel,
        } = backend;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = ws_tx.close().await;
                        break;
                    }
                    Some(segment) = text_rx.recv() => {
                        let msg = json!({
                            "text": segment.text,
                            "end": segment.end,
                            "context_id": context_id,
                        });
                        if let Err(e) = ws_tx.send(Message::Text(msg.to_string().into())).await {
                            let _ = audio_tx.send(Err(e.into()));
                            break;
                        }
                    }
                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let Some(event) = decode_response(&text) else { continue };
                            let done = matches!(&event, Ok(c) if c.is_final) || event.is_err();
                            if audio_tx.send(event).is_err() || done {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(%context_id, "Synthesis connection closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = audio_tx.send(Err(e.into()));
                            break;
                        }
                    },
                }
            }
            debug!(%context_id, "Synthesis stream task ended");
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let synth = MurfSynthesizer::new("en-US-natalie", "Conversational", 44100, "MP3");
        assert_eq!(
            synth.stream_url("k"),
            "wss://api.murf.ai/v1/speech/stream-input?api-key=k&sample_rate=44100&channel_type=MONO&format=MP3"
        );
    }

    #[test]
    fn test_voice_config_message() {
        let synth = MurfSynthesizer::new("en-US-natalie", "Conversational", 44100, "MP3");
        let msg = synth.voice_config("ctx-1");
        assert_eq!(msg["voice_config"]["voiceId"], "en-US-natalie");
        assert_eq!(msg["voice_config"]["style"], "Conversational");
        assert_eq!(msg["context_id"], "ctx-1");
    }

    #[test]
    fn test_decode_response() {
        let chunk = decode_response(r#"{"audio":"AAAA","final":false}"#).unwrap().unwrap();
        assert_eq!(chunk, AudioChunk { payload: "AAAA".into(), is_final: false });

        let chunk = decode_response(r#"{"final":true}"#).unwrap().unwrap();
        assert!(chunk.is_final);
        assert!(chunk.payload.is_empty());

        assert!(decode_response(r#"{"context_id":"x"}"#).is_none());
        assert!(decode_response("not json").is_none());
        assert!(decode_response(r#"{"error":"Invalid voice"}"#).unwrap().is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels_backend() {
        let (stream, backend) = SynthesisStream::channel("ctx");
        assert!(stream.send("Hello.", false));
        drop(stream);
        assert!(backend.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_split_halves() {
        let (stream, mut backend) = SynthesisStream::channel("ctx");
        let (sink, mut audio) = stream.split();
        assert_eq!(sink.context_id(), "ctx");
        assert!(sink.send("One.", true));
        let segment = backend.text_rx.recv().await.unwrap();
        assert_eq!(segment, SynthesisText { text: "One.".into(), end: true });

        backend
            .audio_tx
            .send(Ok(AudioChunk { payload: "AA==".into(), is_final: true }))
            .unwrap();
        assert!(audio.next().await.unwrap().unwrap().is_final);

        drop(sink);
        assert!(!backend.cancel.is_cancelled());
        drop(audio);
        assert!(backend.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_against_local_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Echo server: one audio chunk per segment, final on `end`.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let config: serde_json::Value =
                serde_json::from_str(first.to_text().unwrap()).unwrap();
            assert_eq!(config["context_id"], "ctx-42");
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let msg: serde_json::Value = serde_json::from_str(&text).unwrap();
                let end = msg["end"].as_bool().unwrap();
                let reply = json!({ "audio": "UklGRg==", "final": end });
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                if end {
                    break;
                }
            }
        });

        let synth = MurfSynthesizer::new("en-US-natalie", "Conversational", 44100, "MP3")
            .with_url(&format!("ws://{addr}"));
        let mut stream = synth.open("key", "ctx-42").await.unwrap();
        assert_eq!(stream.context_id(), "ctx-42");
        assert!(stream.send("Hi there.", false));
        assert!(stream.send("Bye.", true));

        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_final);
        let last = stream.next().await.unwrap().unwrap();
        assert!(last.is_final);
        assert!(stream.next().await.is_none());

        server.await.unwrap();
    }
}
