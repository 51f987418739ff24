//! WebSocket endpoint
//!
//! One reader loop and one writer task per connection. The reader
//! dispatches frames strictly in arrival order (the only ordering
//! guarantee the protocol makes); the writer serializes every outbound
//! frame through an mpsc channel, which is what the `Outbound` trait
//! wraps. Fan-out tasks that outlive the socket see channel-closed send
//! errors and swallow them.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;

use classbridge_core::{ConnectionId, Outbound, Role, SendError, SessionId};
use classbridge_storage::SessionStore as _;

use crate::handlers::send_to;
use crate::lifecycle::ALL_STUDENTS_LEFT_REASON;
use crate::metrics;
use crate::protocol::ServerMessage;
use crate::state::AppState;

const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Classroom code; `class` is the legacy alias
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default, rename = "twoWay")]
    two_way: Option<String>,
}

impl WsQuery {
    fn classroom_code(&self) -> Option<String> {
        self.code
            .clone()
            .or_else(|| self.class.clone())
            .filter(|c| !c.is_empty())
    }

    fn two_way(&self) -> bool {
        matches!(
            self.two_way.as_deref(),
            Some("1") | Some("true") | Some("yes") | Some("on")
        )
    }
}

/// Commands consumed by the writer task.
enum WsCommand {
    Text(String),
    Ping,
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
    Terminate,
}

/// The per-connection outbound half handed to everything else.
struct ChannelOutbound {
    tx: mpsc::Sender<WsCommand>,
}

#[async_trait]
impl Outbound for ChannelOutbound {
    async fn send_text(&self, payload: String) -> Result<(), SendError> {
        self.tx
            .send(WsCommand::Text(payload))
            .await
            .map_err(|_| SendError::Closed)
    }

    async fn send_ping(&self) -> Result<(), SendError> {
        self.tx
            .send(WsCommand::Ping)
            .await
            .map_err(|_| SendError::Closed)
    }

    async fn close(&self, code: u16, reason: &str) {
        let _ = self
            .tx
            .send(WsCommand::Close {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    async fn terminate(&self) {
        let _ = self.tx.send(WsCommand::Terminate).await;
    }
}

/// Handle the WebSocket upgrade on /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: AppState, query: WsQuery) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsCommand>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                WsCommand::Text(json) => {
                    if ws_tx.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                WsCommand::Ping => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                WsCommand::Pong(data) => {
                    if ws_tx.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                WsCommand::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Owned(reason),
                        })))
                        .await;
                    break;
                }
                WsCommand::Terminate => break,
            }
        }
    });

    // Connection-id and session-id are assigned at accept; the session-id
    // only changes through an explicit migration in the register handler.
    let connection_id = ConnectionId::generate();
    let session_id = SessionId::generate();
    let sink: Arc<dyn Outbound> = Arc::new(ChannelOutbound { tx: tx.clone() });

    state.core.registry.add(
        connection_id.clone(),
        session_id.clone(),
        sink.clone(),
        query.classroom_code(),
        query.two_way(),
    );
    tracing::info!(
        connection_id = %connection_id,
        session_id = %session_id,
        two_way = query.two_way(),
        "Connection accepted"
    );

    send_to(
        &sink,
        &ServerMessage::Connection {
            status: "connected",
            session_id: session_id.to_string(),
        },
    )
    .await;

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                // In-order: the next frame is not read until this handler
                // returns
                state.dispatcher.dispatch(&connection_id, &text).await;
            }
            Ok(Message::Ping(data)) => {
                state.core.registry.set_alive(&connection_id, true);
                let _ = tx.send(WsCommand::Pong(data)).await;
            }
            Ok(Message::Pong(_)) => {
                state.core.registry.set_alive(&connection_id, true);
            }
            Ok(Message::Close(_)) => break,
            // The protocol is JSON text; binary frames are ignored
            Ok(Message::Binary(_)) => {}
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Socket error");
                break;
            }
        }
    }

    disconnect(&state, &connection_id).await;
    drop(tx);
    let _ = writer.await;
    tracing::info!(connection_id = %connection_id, "Connection closed");
}

/// Remove a connection and settle the session's student accounting.
/// The reader loop ends here; embedders driving the broker without a
/// socket (tests, alternative transports) go through the same path.
pub async fn disconnect(state: &AppState, connection_id: &ConnectionId) {
    let Some(final_state) = state.core.registry.remove(connection_id) else {
        return;
    };
    metrics::record_connection_closed();

    if final_state.role != Role::Student || !final_state.student_counted {
        return;
    }

    let session_id = final_state.session_id;
    match state.core.sessions.remove_student(&session_id).await {
        Ok(remaining) => {
            if remaining == 0 {
                // Starts the students-left grace period and hands the
                // session from the EmptyTeacher reaper to Abandoned
                if let Err(e) = state
                    .core
                    .sessions
                    .set_quality_reason(&session_id, ALL_STUDENTS_LEFT_REASON)
                    .await
                {
                    tracing::warn!(session_id = %session_id, error = %e, "Grace marker write failed");
                }
                if let Err(e) = state
                    .core
                    .sessions
                    .touch_activity(&session_id, chrono::Utc::now())
                    .await
                {
                    tracing::debug!(session_id = %session_id, error = %e, "Activity update failed");
                }
            }

            let update = ServerMessage::StudentCountUpdate { count: remaining };
            for teacher in state.core.registry.teachers_for_session(&session_id) {
                send_to(&teacher.sink, &update).await;
            }
        }
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "Student count decrement failed");
        }
    }
}
