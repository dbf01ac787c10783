//! The per-connection orchestrator loop.
//!
//! Client input, recognition events and pipeline outcomes all arrive as
//! messages into one `select!` loop, which is the only place history and the
//! active task are touched. A final transcript arriving while a turn is
//! still running cancels that turn (barge-in): the writer is fenced, the
//! client told to stop playback, and the new turn starts from history that
//! never saw the interrupted one.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_agent::{
    PipelineHandle, PipelineOutcome, PipelineSettings, Services, TurnBuffer, TurnDecision,
    TurnRequest, spawn_pipeline,
};
use parley_core::protocol::{Outbound, ServerFrame};
use parley_core::session::{SessionKeys, Turn};
use parley_media::{RecognitionEvent, RecognitionHandle, TranscriptEvent};

/// Input from the client after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientInput {
    /// Raw PCM for the recognizer.
    Audio(Vec<u8>),
    Ping,
}

/// What a session looked like when it ended.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub history: Vec<Turn>,
    pub turns_started: u64,
    pub barge_ins: u64,
    pub duplicates: u64,
}

pub struct Session {
    session_id: String,
    keys: Arc<SessionKeys>,
    services: Services,
    settings: Arc<PipelineSettings>,
    out: mpsc::UnboundedSender<Outbound>,
    turn_buffer: TurnBuffer,
    history: Vec<Turn>,
    active: Option<PipelineHandle>,
    next_task_id: u64,
    outcomes_tx: mpsc::UnboundedSender<PipelineOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<PipelineOutcome>,
    turns_started: u64,
    barge_ins: u64,
    duplicates: u64,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        keys: Arc<SessionKeys>,
        services: Services,
        settings: Arc<PipelineSettings>,
        out: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            session_id: session_id.into(),
            keys,
            services,
            settings,
            out,
            turn_buffer: TurnBuffer::new(),
            history: Vec::new(),
            active: None,
            next_task_id: 1,
            outcomes_tx,
            outcomes_rx,
            turns_started: 0,
            barge_ins: 0,
            duplicates: 0,
        }
    }

    /// Run until the client leaves or recognition ends.
    pub async fn run(
        mut self,
        mut client: mpsc::UnboundedReceiver<ClientInput>,
        recognition: RecognitionHandle,
        mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
    ) -> SessionReport {
        info!(session_id = %self.session_id, "Session started");

        loop {
            tokio::select! {
                input = client.recv() => match input {
                    Some(ClientInput::Audio(bytes)) => {
                        if !recognition.send_audio(bytes) {
                            debug!(session_id = %self.session_id, "Recognition gone, audio dropped");
                        }
                    }
                    Some(ClientInput::Ping) => self.send(ServerFrame::Pong),
                    None => {
                        debug!(session_id = %self.session_id, "Client input closed");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Some(RecognitionEvent::Transcript(event)) => self.on_transcript(&event),
                    Some(RecognitionEvent::Error(message)) => {
                        warn!(session_id = %self.session_id, %message, "Speech recognition failed");
                        self.send(ServerFrame::error(
                            "Speech recognition stopped unexpectedly. Please reconnect.",
                        ));
                        break;
                    }
                    Some(RecognitionEvent::Closed) | None => {
                        info!(session_id = %self.session_id, "Speech recognition closed");
                        break;
                    }
                },
                Some(outcome) = self.outcomes_rx.recv() => self.on_outcome(outcome),
            }
        }

        if let Some(active) = self.active.take() {
            debug!(session_id = %self.session_id, task_id = active.task_id(), "Cancelling turn on shutdown");
            active.cancel();
        }
        recognition.close();
        info!(
            session_id = %self.session_id,
            turns = self.turns_started,
            history = self.history.len(),
            "Session ended"
        );

        SessionReport {
            history: self.history,
            turns_started: self.turns_started,
            barge_ins: self.barge_ins,
            duplicates: self.duplicates,
        }
    }

    fn send(&self, frame: ServerFrame) {
        let _ = self.out.send(Outbound::session(frame));
    }

    fn on_transcript(&mut self, event: &TranscriptEvent) {
        match self.turn_buffer.accept(event) {
            TurnDecision::Interim => {}
            TurnDecision::Duplicate => {
                self.duplicates += 1;
                #[cfg(feature = "metrics")]
                crate::metrics::record_duplicate_turn();
            }
            TurnDecision::Final(text) => {
                info!(session_id = %self.session_id, %text, "User turn");
                self.send(ServerFrame::Transcription {
                    text: text.clone(),
                    end_of_turn: true,
                });
                self.start_turn(text);
            }
        }
    }

    fn start_turn(&mut self, transcript: String) {
        // An outcome may be queued while its task is still unwinding. Commit
        // it first so a completed turn is not mistaken for a barge-in.
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            self.on_outcome(outcome);
        }

        if let Some(previous) = self.active.take() {
            previous.cancel();
            // The fence goes first: nothing the old task queues after this
            // point reaches the client.
            let _ = self.out.send(Outbound::Fence {
                floor: self.next_task_id,
            });
            self.send(ServerFrame::AudioInterrupt);
            self.barge_ins += 1;
            info!(
                session_id = %self.session_id,
                task_id = previous.task_id(),
                "Barge-in, previous turn cancelled"
            );
            #[cfg(feature = "metrics")]
            crate::metrics::record_barge_in();
        }

        let task_id = self.next_task_id;
        self.next_task_id += 1;
        self.turns_started += 1;
        #[cfg(feature = "metrics")]
        crate::metrics::record_turn_started();

        let request = TurnRequest {
            task_id,
            transcript,
            history: self.history.clone(),
            keys: self.keys.clone(),
            context_id: format!("{}-{task_id}", self.session_id),
        };
        self.active = Some(spawn_pipeline(
            self.services.clone(),
            self.settings.clone(),
            request,
            self.out.clone(),
            self.outcomes_tx.clone(),
        ));
    }

    fn on_outcome(&mut self, outcome: PipelineOutcome) {
        let PipelineOutcome { task_id, result } = outcome;
        if self.active.as_ref().map(PipelineHandle::task_id) != Some(task_id) {
            debug!(session_id = %self.session_id, task_id, "Discarding stale outcome");
            return;
        }
        self.active = None;

        match result {
            Ok(report) => {
                #[cfg(feature = "metrics")]
                crate::metrics::record_tool_calls(report.tool_calls);
                self.history.extend(report.turns);
                debug!(
                    session_id = %self.session_id,
                    task_id,
                    tool_calls = report.tool_calls,
                    history = self.history.len(),
                    "Turn committed"
                );
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                warn!(session_id = %self.session_id, task_id, kind = e.kind(), %e, "Turn failed");
                #[cfg(feature = "metrics")]
                crate::metrics::record_pipeline_failure(e.kind());
                self.send(ServerFrame::error(e.user_message()));
            }
        }
    }
}
