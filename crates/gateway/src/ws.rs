//! WebSocket transport — the live envelope stream for one conversation.
//!
//! Protocol (client → server):
//! - `{"type": "analyze", "query": "..."}` — run one conversation step
//! - `{"type": "ping", "timestamp": ...}` — liveness check
//!
//! Server → client: every envelope verbatim as it is produced, then one
//! `{"type": "complete"}` frame; failures arrive as the engine's own
//! kind=`error` envelope followed by an `{"type": "error"}` frame.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use datascope_core::envelope::Envelope;
use datascope_core::error::EngineError;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::SharedState;

/// One frame from the client.
#[derive(Debug, Deserialize)]
pub(crate) struct WsClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// Capacity of the envelope channel between engine and socket. Small on
/// purpose: the engine suspends on a full channel, which preserves the
/// envelope-before-next-step ordering guarantee under a slow client.
const ENVELOPE_BUFFER: usize = 16;

pub(crate) async fn handle_socket(mut socket: WebSocket, conversation_id: String, state: SharedState) {
    info!(conversation_id = %conversation_id, "WebSocket connection established");

    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue, // ignore binary, ping, pong
            Err(_) => break,
        };

        let client_msg: WsClientMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                send_error(&mut socket, &conversation_id, &format!("Invalid message: {e}")).await;
                continue;
            }
        };

        match client_msg.msg_type.as_str() {
            "analyze" => {
                if run_analyze(&mut socket, &conversation_id, &state, &client_msg.query)
                    .await
                    .is_err()
                {
                    break; // client went away mid-stream
                }
            }
            "ping" => {
                let pong = serde_json::json!({
                    "type": "pong",
                    "conversation_id": conversation_id,
                    "timestamp": client_msg.timestamp,
                });
                if send_json(&mut socket, &pong).await.is_err() {
                    break;
                }
            }
            other => {
                send_error(
                    &mut socket,
                    &conversation_id,
                    &format!("Unknown message type: {other}"),
                )
                .await;
            }
        }
    }

    info!(conversation_id = %conversation_id, "WebSocket connection closed");
}

/// Run one conversation step, forwarding envelopes as they are produced.
/// `Err(())` means the socket is gone and the caller should stop.
async fn run_analyze(
    socket: &mut WebSocket,
    conversation_id: &str,
    state: &SharedState,
    query: &str,
) -> Result<(), ()> {
    let handle = state.registry.get_or_create(conversation_id).await;

    let (tx, mut rx) = mpsc::channel::<Envelope>(ENVELOPE_BUFFER);
    let run = {
        let handle = handle.clone();
        let query = query.to_string();
        tokio::spawn(async move {
            let mut engine = handle.engine.lock().await;
            engine.run(&query, &tx).await
        })
    };

    let mut client_gone = false;
    while let Some(envelope) = rx.recv().await {
        let json = serde_json::to_string(&envelope).unwrap_or_default();
        if socket.send(WsMessage::Text(json.into())).await.is_err() {
            client_gone = true;
            break;
        }
    }
    // With the client gone the receiver is dropped here, so the engine's
    // next send cancels the step; envelopes already forwarded remain valid
    // memory entries.
    drop(rx);

    let result = run.await;
    handle.touch().await;

    if client_gone {
        return Err(());
    }

    match result {
        Ok(Ok(())) => {
            let complete = serde_json::json!({
                "type": "complete",
                "conversation_id": conversation_id,
            });
            send_json(socket, &complete).await
        }
        Ok(Err(EngineError::Cancelled)) => Err(()),
        Ok(Err(e)) => {
            warn!(conversation_id, error = %e, "Conversation step failed");
            send_error(socket, conversation_id, &e.to_string()).await;
            Ok(())
        }
        Err(join_error) => {
            warn!(conversation_id, error = %join_error, "Engine task panicked");
            send_error(socket, conversation_id, "internal engine failure").await;
            Ok(())
        }
    }
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> Result<(), ()> {
    let json = serde_json::to_string(value).unwrap_or_default();
    socket
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| ())
}

async fn send_error(socket: &mut WebSocket, conversation_id: &str, message: &str) {
    let frame = serde_json::json!({
        "type": "error",
        "error": message,
        "conversation_id": conversation_id,
    });
    let _ = send_json(socket, &frame).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_frame_parses() {
        let msg: WsClientMessage =
            serde_json::from_str(r#"{"type": "analyze", "query": "revenue by month"}"#).unwrap();
        assert_eq!(msg.msg_type, "analyze");
        assert_eq!(msg.query, "revenue by month");
    }

    #[test]
    fn ping_frame_parses_with_timestamp() {
        let msg: WsClientMessage =
            serde_json::from_str(r#"{"type": "ping", "timestamp": 123456}"#).unwrap();
        assert_eq!(msg.msg_type, "ping");
        assert_eq!(msg.timestamp, Some(serde_json::json!(123456)));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let msg: WsClientMessage = serde_json::from_str(
            r#"{"type": "analyze", "query": "q", "options": {"depth": 2}}"#,
        )
        .unwrap();
        assert_eq!(msg.msg_type, "analyze");
    }
}
