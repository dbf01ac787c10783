//! The generation-synthesis pipeline for one user turn.
//!
//! Generation streams text to the client and, sentence by sentence, into a
//! synthesis context while the synthesized audio is relayed concurrently.
//! Tool calls interrupt generation: the tool runs, its call/result pair is
//! recorded, and generation resumes. Nothing touches session history here;
//! the finished set of turns goes back to the orchestrator in a
//! [`PipelineOutcome`], and a cancelled or failed task reports no turns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::config::Config;
use parley_core::protocol::{Outbound, ServerFrame};
use parley_core::session::{SessionKeys, Turn};
use parley_media::{SpeechSynthesizer, SynthesisAudio, SynthesisSink};
use parley_providers::{CompletionChunk, CompletionRequest, LlmProvider};
use parley_tools::{ClientEffect, ToolExecutor};

use crate::PipelineError;
use crate::prompt::{build_system_prompt, wrap_transcript};
use crate::segmenter::SentenceSegmenter;

/// Generation and synthesis knobs, fixed per gateway.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub model: String,
    pub persona: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    /// Tool rounds allowed per turn; the request after the last one is
    /// sent without tool declarations.
    pub max_tool_rounds: u32,
    pub synthesis_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model(),
            persona: config.persona().map(str::to_string),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            max_tool_rounds: config.max_tool_rounds(),
            synthesis_timeout: config.synthesis_timeout(),
        }
    }
}

/// The external collaborators a turn talks to.
#[derive(Clone)]
pub struct Services {
    pub provider: Arc<dyn LlmProvider>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub tools: Arc<dyn ToolExecutor>,
}

/// Everything one turn needs, snapshotted when it starts.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub task_id: u64,
    pub transcript: String,
    pub history: Vec<Turn>,
    pub keys: Arc<SessionKeys>,
    /// Correlates this turn's synthesis requests.
    pub context_id: String,
}

/// What a completed turn adds to history.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    /// User turn, any tool call/result pairs, then the model turn.
    pub turns: Vec<Turn>,
    pub tool_calls: u32,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub task_id: u64,
    pub result: Result<TurnReport, PipelineError>,
}

/// Handle to a running turn.
pub struct PipelineHandle {
    task_id: u64,
    cancel: CancellationToken,
}

impl PipelineHandle {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Tags frames with the task id and goes quiet once cancelled.
struct FrameEmitter {
    task_id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
}

impl FrameEmitter {
    fn send(&self, frame: ServerFrame) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.tx.send(Outbound::Frame {
            task: Some(self.task_id),
            frame,
        });
    }
}

/// Start a turn. Frames go to `frames`; the outcome, including
/// cancellation, is always reported on `outcomes`.
pub fn spawn_pipeline(
    services: Services,
    settings: Arc<PipelineSettings>,
    request: TurnRequest,
    frames: mpsc::UnboundedSender<Outbound>,
    outcomes: mpsc::UnboundedSender<PipelineOutcome>,
) -> PipelineHandle {
    let task_id = request.task_id;
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        let emitter = FrameEmitter {
            task_id,
            tx: frames,
            cancel: task_cancel.clone(),
        };
        let result = tokio::select! {
            _ = task_cancel.cancelled() => Err(PipelineError::Cancelled),
            r = run_turn(&services, &settings, request, &emitter) => r,
        };
        match &result {
            Ok(report) => info!(task_id, turns = report.turns.len(), "Turn complete"),
            Err(PipelineError::Cancelled) => debug!(task_id, "Turn cancelled"),
            Err(e) => warn!(task_id, %e, "Turn failed"),
        }
        let _ = outcomes.send(PipelineOutcome { task_id, result });
    });

    PipelineHandle { task_id, cancel }
}

struct Generated {
    turns: Vec<Turn>,
    tool_calls: u32,
    /// Whether any text went to synthesis.
    spoke: bool,
}

async fn run_turn(
    services: &Services,
    settings: &PipelineSettings,
    request: TurnRequest,
    emitter: &FrameEmitter,
) -> Result<TurnReport, PipelineError> {
    let TurnRequest {
        task_id,
        transcript,
        history,
        keys,
        context_id,
    } = request;
    info!(task_id, %context_id, history = history.len(), "Starting turn");

    let synthesis = services
        .synthesizer
        .open(&keys.murf, &context_id)
        .await
        .map_err(PipelineError::from_synthesis)?;
    let (sink, mut audio) = synthesis.split();
    let (text_done_tx, text_done_rx) = oneshot::channel();

    let generation = async move {
        let result = generate(services, settings, &transcript, &history, &keys, &sink, emitter).await;
        if let Ok(generated) = &result {
            let _ = text_done_tx.send(generated.spoke);
        }
        result
    };
    let relay = relay_audio(&mut audio, emitter, text_done_rx, settings.synthesis_timeout);

    let (generated, ()) = tokio::try_join!(generation, relay)?;
    Ok(TurnReport {
        turns: generated.turns,
        tool_calls: generated.tool_calls,
    })
}

/// Send one trimmed segment; blank segments are skipped.
fn speak(sink: &SynthesisSink, segment: &str, end: bool) -> bool {
    let segment = segment.trim();
    if segment.is_empty() {
        return false;
    }
    if !sink.send(segment, end) {
        debug!("Synthesis backend gone; segment dropped");
    }
    true
}

async fn generate(
    services: &Services,
    settings: &PipelineSettings,
    transcript: &str,
    history: &[Turn],
    keys: &SessionKeys,
    sink: &SynthesisSink,
    emitter: &FrameEmitter,
) -> Result<Generated, PipelineError> {
    let provider = &services.provider;
    let definitions = services.tools.definitions(keys);
    let system = build_system_prompt(settings.persona.as_deref(), &definitions);

    let mut pending = vec![Turn::user(transcript)];
    let mut segmenter = SentenceSegmenter::new();
    let mut full_text = String::new();
    let mut spoke = false;
    let mut rounds = 0u32;
    let mut tool_calls = 0u32;

    loop {
        let offer_tools = rounds < settings.max_tool_rounds && !definitions.is_empty();

        // The request sees the wrapped transcript; history keeps it bare.
        let mut context = history.to_vec();
        context.push(Turn::user(wrap_transcript(transcript)));
        context.extend(pending.iter().skip(1).cloned());

        let request = CompletionRequest {
            model: settings.model.clone(),
            messages: provider.format_messages(&context),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            tools: offer_tools.then(|| provider.format_tools(&definitions)),
            system: Some(system.clone()),
        };
        debug!(round = rounds, offer_tools, "Submitting generation request");

        let mut stream = provider
            .stream(&request, &keys.gemini)
            .await
            .map_err(PipelineError::from_generation)?;

        let mut calls = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(PipelineError::from_generation)? {
                CompletionChunk::Text { text } => {
                    emitter.send(ServerFrame::LlmChunk { data: text.clone() });
                    full_text.push_str(&text);
                    for sentence in segmenter.feed(&text) {
                        spoke |= speak(sink, &sentence, false);
                    }
                }
                CompletionChunk::ToolCall { name, arguments } => calls.push((name, arguments)),
                CompletionChunk::Stop { reason } => debug!(%reason, "Generation finished"),
            }
        }

        if calls.is_empty() {
            break;
        }
        if !offer_tools {
            warn!(calls = calls.len(), "Tool calls after the round limit ignored");
            break;
        }
        rounds += 1;

        for (name, arguments) in calls {
            tool_calls += 1;
            emitter.send(ServerFrame::status(format!("using {name}")));
            let output = services.tools.dispatch(&name, &arguments, keys).await;
            if let Some(ClientEffect::StartTimer { duration_seconds }) = output.effect {
                emitter.send(ServerFrame::StartTimer { duration_seconds });
            }
            pending.push(Turn::tool_call(&name, arguments));
            pending.push(Turn::tool_result(&name, output.content));
        }
    }

    // Always close the context so the service sends its final marker.
    let remainder = segmenter.flush();
    if spoke || !remainder.trim().is_empty() {
        sink.send(remainder.trim(), true);
        spoke = true;
    }

    let text = full_text.trim();
    if !text.is_empty() {
        info!(chars = text.len(), "Model response complete");
        pending.push(Turn::model(text));
    }

    Ok(Generated {
        turns: pending,
        tool_calls,
        spoke,
    })
}

/// Relay audio until the final chunk or the connection closes. Once all
/// text has been sent, the wait is bounded by `timeout`.
async fn relay_audio(
    audio: &mut SynthesisAudio,
    emitter: &FrameEmitter,
    mut text_done: oneshot::Receiver<bool>,
    timeout: Duration,
) -> Result<(), PipelineError> {
    let mut started = false;
    let mut text_pending = true;
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            chunk = audio.next() => match chunk {
                Some(Ok(chunk)) => {
                    if !chunk.payload.is_empty() {
                        if !started {
                            emitter.send(ServerFrame::AudioStart);
                            started = true;
                        }
                        emitter.send(ServerFrame::Audio { data: chunk.payload });
                    }
                    if chunk.is_final {
                        break;
                    }
                }
                Some(Err(e)) => return Err(PipelineError::from_synthesis(e)),
                None => {
                    debug!("Synthesis closed without a final marker");
                    break;
                }
            },
            done = &mut text_done, if text_pending => {
                text_pending = false;
                match done {
                    Ok(true) => deadline.as_mut().reset(Instant::now() + timeout),
                    // Nothing to synthesize, or generation failed.
                    _ => return Ok(()),
                }
            }
            () = &mut deadline, if !text_pending => {
                return Err(PipelineError::SynthesisTimeout(timeout));
            }
        }
    }

    if started {
        emitter.send(ServerFrame::AudioEnd);
    }
    Ok(())
}
