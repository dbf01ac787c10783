//! In-process fakes of the streaming backends.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt as _;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_agent::{PipelineSettings, Services};
use parley_core::session::{SessionKeys, Turn};
use parley_media::{
    AudioChunk, MediaError, RecognitionEvent, RecognitionHandle, SpeechRecognizer,
    SpeechSynthesizer, SynthesisStream, TranscriptEvent,
};
use parley_providers::{ChunkStream, CompletionChunk, CompletionRequest, LlmProvider, ToolDefinition};
use parley_tools::{ToolExecutor, ToolOutput};

/// One scripted generation response.
pub struct Reply {
    pub chunks: Vec<CompletionChunk>,
    pub delay: Duration,
}

impl Reply {
    pub fn text(parts: &[&str]) -> Self {
        Self {
            chunks: parts.iter().map(|p| text(p)).collect(),
            delay: Duration::ZERO,
        }
    }

    pub fn tool(name: &str, args: serde_json::Value) -> Self {
        Self {
            chunks: vec![CompletionChunk::ToolCall {
                name: name.into(),
                arguments: args.as_object().cloned().unwrap(),
            }],
            delay: Duration::ZERO,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub fn text(t: &str) -> CompletionChunk {
    CompletionChunk::Text { text: t.into() }
}

/// Plays back one scripted reply per request, then "Okay."
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Reply>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn format_messages(&self, history: &[Turn]) -> Vec<serde_json::Value> {
        history.iter().map(|t| serde_json::to_value(t).unwrap()).collect()
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools.iter().map(|t| json!(t.name)).collect()
    }

    async fn stream(
        &self,
        _request: &CompletionRequest,
        _api_key: &str,
    ) -> anyhow::Result<ChunkStream> {
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::text(&["Okay."]));
        let delay = reply.delay;
        let stream = futures::stream::iter(reply.chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, anyhow::Error>(chunk)
        });
        Ok(Box::pin(stream))
    }
}

/// Answers every segment with one audio chunk, `audio:<text>`.
pub struct EchoSynthesizer {
    reject_key: bool,
}

impl EchoSynthesizer {
    pub fn new() -> Self {
        Self { reject_key: false }
    }

    pub fn rejecting() -> Self {
        Self { reject_key: true }
    }
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn open(&self, _api_key: &str, context_id: &str) -> anyhow::Result<SynthesisStream> {
        if self.reject_key {
            return Err(MediaError::Unauthorized { service: "Murf" }.into());
        }
        let (stream, mut backend) = SynthesisStream::channel(context_id);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = backend.cancel.cancelled() => break,
                    segment = backend.text_rx.recv() => {
                        let Some(segment) = segment else { break };
                        let chunk = AudioChunk {
                            payload: format!("audio:{}", segment.text),
                            is_final: segment.end,
                        };
                        if backend.audio_tx.send(Ok(chunk)).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(stream)
    }
}

/// A weather tool with a canned answer.
pub struct FakeTools;

#[async_trait]
impl ToolExecutor for FakeTools {
    fn definitions(&self, _keys: &SessionKeys) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "get_weather".into(),
            description: "Get the current weather".into(),
            parameters_schema: json!({"type": "object"}),
        }]
    }

    async fn dispatch(
        &self,
        name: &str,
        _arguments: &serde_json::Map<String, serde_json::Value>,
        _keys: &SessionKeys,
    ) -> ToolOutput {
        match name {
            "get_weather" => ToolOutput::text("Weather for Paris, France: Cloudy, 15°C."),
            _ => ToolOutput::error("I don't have that capability."),
        }
    }
}

/// Treats each audio frame as UTF-8 text and reports it as a finished,
/// formatted turn.
pub struct EchoRecognizer;

#[async_trait]
impl SpeechRecognizer for EchoRecognizer {
    async fn connect(
        &self,
        _api_key: &str,
        _sample_rate: u32,
    ) -> anyhow::Result<(RecognitionHandle, mpsc::UnboundedReceiver<RecognitionEvent>)> {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    bytes = audio_rx.recv() => {
                        let Some(bytes) = bytes else { break };
                        let event = TranscriptEvent {
                            transcript: String::from_utf8_lossy(&bytes).into_owned(),
                            end_of_turn: true,
                            turn_is_formatted: true,
                        };
                        let _ = event_tx.send(RecognitionEvent::Transcript(event));
                    }
                }
            }
        });
        Ok((RecognitionHandle { audio_tx, cancel }, event_rx))
    }
}

pub fn services(provider: ScriptedProvider, synthesizer: EchoSynthesizer) -> Services {
    Services {
        provider: Arc::new(provider),
        synthesizer: Arc::new(synthesizer),
        tools: Arc::new(FakeTools),
    }
}

pub fn settings() -> Arc<PipelineSettings> {
    Arc::new(PipelineSettings {
        model: "gemini-test".into(),
        persona: None,
        max_tokens: 256,
        temperature: None,
        max_tool_rounds: 5,
        synthesis_timeout: Duration::from_secs(5),
    })
}

pub fn keys() -> Arc<SessionKeys> {
    Arc::new(SessionKeys {
        gemini: "g".into(),
        assemblyai: "a".into(),
        murf: "m".into(),
        weather: Some("w".into()),
        tavily: None,
    })
}
