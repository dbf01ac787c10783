//! WebSocket connection lifecycle: handshake, read/write loops.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::protocol::{ClientFrame, ClientKeys, Outbound, ServerFrame};
use parley_core::session::SessionKeys;
use parley_media::MediaError;

use crate::session::{ClientInput, Session};
use crate::state::GatewayState;

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, "New WebSocket connection");

    let (ws_tx, mut ws_rx) = ws.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
    let writer = tokio::spawn(write_loop(ws_tx, out_rx));

    let handshake =
        tokio::time::timeout(state.config.handshake_timeout(), wait_for_config(&mut ws_rx)).await;
    let client_keys = match handshake {
        Ok(Ok(keys)) => keys,
        Ok(Err(reason)) => {
            warn!(session_id = %session_id, %reason, "Handshake failed");
            close_with_error(&out_tx, reason);
            let _ = writer.await;
            return;
        }
        Err(_) => {
            warn!(session_id = %session_id, "Handshake timeout");
            close_with_error(&out_tx, "No configuration received. Closing connection.");
            let _ = writer.await;
            return;
        }
    };

    let keys = match SessionKeys::resolve(&client_keys, &state.config.keys()) {
        Ok(keys) => Arc::new(keys),
        Err(e) => {
            warn!(session_id = %session_id, %e, "Session rejected");
            close_with_error(&out_tx, e.to_string());
            let _ = writer.await;
            return;
        }
    };

    let connected = state
        .recognizer
        .connect(&keys.assemblyai, state.config.input_sample_rate())
        .await;
    let (recognition, events) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            warn!(session_id = %session_id, error = %format!("{e:#}"), "Speech recognition unavailable");
            let message = if MediaError::is_unauthorized(&e) {
                "Invalid or expired AssemblyAI API key. Please check your settings."
            } else {
                "Could not connect to the speech recognition service."
            };
            close_with_error(&out_tx, message);
            let _ = writer.await;
            return;
        }
    };

    state.register_session(&session_id).await;
    let _ = out_tx.send(Outbound::session(ServerFrame::status("connected")));

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_loop(ws_rx, input_tx));

    let session = Session::new(
        session_id.clone(),
        keys,
        state.services.clone(),
        state.settings.clone(),
        out_tx.clone(),
    );
    let report = session.run(input_rx, recognition, events).await;

    reader.abort();
    let _ = out_tx.send(Outbound::Close);
    let _ = writer.await;
    state.release_session(&session_id).await;
    info!(
        session_id = %session_id,
        turns = report.turns_started,
        barge_ins = report.barge_ins,
        "WebSocket connection closed"
    );
}

fn close_with_error(out: &mpsc::UnboundedSender<Outbound>, message: impl Into<String>) {
    let _ = out.send(Outbound::session(ServerFrame::error(message)));
    let _ = out.send(Outbound::Close);
}

/// Writer-side filter for frames of cancelled tasks.
#[derive(Debug, Default)]
pub struct TaskFence {
    floor: u64,
}

impl TaskFence {
    pub fn raise(&mut self, floor: u64) {
        self.floor = self.floor.max(floor);
    }

    /// Session frames always pass; task frames only at or above the floor.
    pub fn admits(&self, task: Option<u64>) -> bool {
        task.is_none_or(|id| id >= self.floor)
    }
}

/// Drain queued frames into the socket until `Close` or the socket fails.
pub async fn write_loop<S>(mut ws_tx: S, mut out_rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin,
{
    let mut fence = TaskFence::default();

    while let Some(outbound) = out_rx.recv().await {
        match outbound {
            Outbound::Fence { floor } => fence.raise(floor),
            Outbound::Frame { task, frame } => {
                if !fence.admits(task) {
                    debug!(task, kind = frame.kind(), "Dropping frame from cancelled turn");
                    continue;
                }
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(%e, "Failed to serialize frame");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    debug!("Client socket closed");
                    break;
                }
            }
            Outbound::Close => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Wait for the `config` frame that must open every session.
async fn wait_for_config<S>(ws_rx: &mut S) -> Result<ClientKeys, String>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(ClientFrame::Config { keys }) => Ok(keys),
                    Ok(other) => Err(format!("Expected a config frame, got {other:?}")),
                    Err(e) => Err(format!("Invalid config frame: {e}")),
                };
            }
            Ok(Message::Binary(_)) => return Err("Audio received before config".to_string()),
            Ok(Message::Close(_)) => return Err("Connection closed during handshake".to_string()),
            Ok(_) => continue,
            Err(e) => return Err(format!("WebSocket error during handshake: {e}")),
        }
    }
    Err("Connection dropped during handshake".to_string())
}

/// How the reader treats one client message after the handshake.
#[derive(Debug, PartialEq)]
enum Inbound {
    Input(ClientInput),
    Ignore,
    Close,
}

fn classify(msg: Message) -> Inbound {
    match msg {
        Message::Binary(bytes) => Inbound::Input(ClientInput::Audio(bytes.to_vec())),
        Message::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(ClientFrame::Ping) => Inbound::Input(ClientInput::Ping),
            Ok(ClientFrame::Config { .. }) => {
                debug!("Repeated config frame ignored");
                Inbound::Ignore
            }
            Err(e) => {
                warn!(%e, "Malformed control frame dropped");
                Inbound::Ignore
            }
        },
        Message::Close(_) => Inbound::Close,
        // Axum answers WebSocket pings itself.
        Message::Ping(_) | Message::Pong(_) => Inbound::Ignore,
    }
}

/// Forward client messages to the session until the client leaves.
async fn read_loop<S>(mut ws_rx: S, input: mpsc::UnboundedSender<ClientInput>)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%e, "WebSocket read error");
                break;
            }
        };
        match classify(msg) {
            Inbound::Input(item) => {
                if input.send(item).is_err() {
                    break;
                }
            }
            Inbound::Ignore => {}
            Inbound::Close => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(json: &str) -> Message {
        Message::Text(json.to_string().into())
    }

    async fn written(outbound: Vec<Outbound>) -> Vec<serde_json::Value> {
        let (sink, mut socket) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::unbounded_channel();
        for item in outbound {
            tx.send(item).unwrap();
        }
        drop(tx);
        write_loop(sink, rx).await;

        let mut frames = Vec::new();
        while let Some(msg) = socket.next().await {
            if let Message::Text(text) = msg {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    #[test]
    fn test_fence_admits() {
        let mut fence = TaskFence::default();
        assert!(fence.admits(Some(1)));
        fence.raise(3);
        assert!(!fence.admits(Some(2)));
        assert!(fence.admits(Some(3)));
        assert!(fence.admits(None));
        // Never lowered.
        fence.raise(1);
        assert!(!fence.admits(Some(2)));
    }

    #[tokio::test]
    async fn test_writer_drops_frames_behind_fence() {
        let frames = written(vec![
            Outbound::Frame {
                task: Some(1),
                frame: ServerFrame::Audio { data: "a".into() },
            },
            Outbound::Fence { floor: 2 },
            Outbound::session(ServerFrame::AudioInterrupt),
            Outbound::Frame {
                task: Some(1),
                frame: ServerFrame::Audio { data: "stale".into() },
            },
            Outbound::Frame {
                task: Some(2),
                frame: ServerFrame::AudioStart,
            },
        ])
        .await;

        let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["audio", "audio_interrupt", "audio_start"]);
        assert_eq!(frames[0]["data"], "a");
    }

    #[tokio::test]
    async fn test_writer_stops_at_close() {
        let frames = written(vec![
            Outbound::session(ServerFrame::error("bad key")),
            Outbound::Close,
            Outbound::session(ServerFrame::status("late")),
        ])
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "error");
    }

    #[tokio::test]
    async fn test_wait_for_config() {
        let mut stream = futures::stream::iter(vec![Ok::<_, axum::Error>(text(
            r#"{"type":"config","keys":{"gemini":"g"}}"#,
        ))]);
        let keys = wait_for_config(&mut stream).await.unwrap();
        assert_eq!(keys.gemini.as_deref(), Some("g"));
    }

    #[tokio::test]
    async fn test_wait_for_config_rejects_other_frames() {
        let mut stream = futures::stream::iter(vec![Ok::<_, axum::Error>(text(r#"{"type":"ping"}"#))]);
        assert!(wait_for_config(&mut stream).await.is_err());

        let mut stream =
            futures::stream::iter(vec![Ok::<_, axum::Error>(Message::Binary(vec![0u8; 4].into()))]);
        assert!(wait_for_config(&mut stream).await.is_err());

        let mut stream = futures::stream::iter(vec![Ok::<_, axum::Error>(text("not json"))]);
        let err = wait_for_config(&mut stream).await.unwrap_err();
        assert!(err.contains("Invalid config frame"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(Message::Binary(vec![1u8, 2].into())),
            Inbound::Input(ClientInput::Audio(vec![1, 2]))
        );
        assert_eq!(classify(text(r#"{"type":"ping"}"#)), Inbound::Input(ClientInput::Ping));
        assert_eq!(classify(text(r#"{"type":"bogus"}"#)), Inbound::Ignore);
        assert_eq!(classify(text(r#"{"type":"config"}"#)), Inbound::Ignore);
        assert_eq!(classify(Message::Close(None)), Inbound::Close);
    }
}
