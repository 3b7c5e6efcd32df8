//! WebSocket progress endpoint.
//!
//! GET /ws/tasks/:task_id
//!
//! Subscribes to the StreamHub for one task, greets the client, then forwards
//! every task event as a JSON text frame. Clients may send
//! `{"action":"ping"}` and get `{"type":"pong"}` back. The subscription is
//! released whenever the loop ends: client close, socket error or a failed
//! send.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    response::Response,
};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::kernel::StreamHub;
use crate::server::app::AppState;
use crate::server::error::ApiError;

pub async fn task_ws_handler(
    Extension(state): Extension<AppState>,
    Path(task_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // Browsers cannot attach custom headers to a websocket handshake, so
    // the stream is keyed by the task id alone.
    state.deps.manager.get(task_id, None).await?;

    let hub = state.deps.hub.clone();
    Ok(ws.on_upgrade(move |socket| stream_task(socket, hub, task_id)))
}

/// The greeting sent once the subscription is in place.
pub fn welcome_message(task_id: Uuid) -> Value {
    json!({
        "type": "connection",
        "task_id": task_id,
        "message": "Connected to task progress stream",
    })
}

/// Reply to a client text frame, if it warrants one.
pub fn client_reply(task_id: Uuid, text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(message) if message.get("action").and_then(Value::as_str) == Some("ping") => {
            Some(json!({ "type": "pong" }))
        }
        Ok(message) => {
            debug!(task_id = %task_id, message = %message, "ignoring client message");
            None
        }
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "invalid JSON from websocket client");
            None
        }
    }
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> bool {
    socket.send(Message::Text(value.to_string())).await.is_ok()
}

async fn stream_task(mut socket: WebSocket, hub: StreamHub, task_id: Uuid) {
    let mut subscription = hub.subscribe(task_id).await;
    debug!(task_id = %task_id, subscription = subscription.id(), "websocket subscribed");

    if send_json(&mut socket, &welcome_message(task_id)).await {
        loop {
            tokio::select! {
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    match serde_json::to_value(&event) {
                        Ok(value) => {
                            if !send_json(&mut socket, &value).await {
                                break;
                            }
                        }
                        Err(e) => warn!(task_id = %task_id, error = %e, "failed to serialize task event"),
                    }
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = client_reply(task_id, &text) {
                            if !send_json(&mut socket, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(task_id = %task_id, error = %e, "websocket error");
                        break;
                    }
                },
            }
        }
    }

    hub.unsubscribe(task_id, subscription.id()).await;
    debug!(task_id = %task_id, "websocket closed");
}
