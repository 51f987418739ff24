//! Message dispatch
//!
//! A typed handler registry keyed by the frame's `type` string. The
//! dispatcher enforces the session-liveness gate, routes to the handler,
//! and applies the post-handler activity update (with the audio write
//! throttle). Handlers recover their own failures; whatever still bubbles
//! up here is logged, never thrown.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use classbridge_core::{close_code, send_json, ConnectionId, Outbound};
use classbridge_storage::SessionStore as _;

use crate::handlers;
use crate::metrics;
use crate::protocol::{self, decode_frame, ServerMessage, ERROR_SESSION_EXPIRED};
use crate::registry::ConnectionSnapshot;
use crate::state::BrokerCore;

/// Message types that bypass session validation.
const SESSION_EXEMPT_TYPES: [&str; 3] = ["register", "ping", "pong"];

#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    /// Wrong role for the operation; the message is dropped
    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("malformed payload: {0}")]
    Malformed(#[from] protocol::CodecError),

    #[error("{0}")]
    Internal(String),
}

pub type HandlerResult = Result<(), HandlerError>;

/// What a handler sees: its own connection plus the shared services.
pub struct HandlerContext {
    pub core: Arc<BrokerCore>,
    pub connection_id: ConnectionId,
    pub snapshot: ConnectionSnapshot,
}

impl HandlerContext {
    pub fn sink(&self) -> &Arc<dyn Outbound> {
        &self.snapshot.sink
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The `type` string this handler owns
    fn message_type(&self) -> &'static str;

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(handler.message_type(), handler);
    }

    pub fn get(&self, message_type: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(message_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct Dispatcher {
    core: Arc<BrokerCore>,
    registry: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(core: Arc<BrokerCore>) -> Self {
        let mut registry = HandlerRegistry::default();
        for handler in handlers::all(&core) {
            registry.register(handler);
        }
        Self { core, registry }
    }

    /// Handle one inbound text frame, in arrival order for its connection.
    pub async fn dispatch(&self, connection_id: &ConnectionId, raw: &str) {
        let (message_type, frame) = match decode_frame(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                metrics::record_malformed_message();
                tracing::warn!(connection_id = %connection_id, error = %e, "Ignoring malformed frame");
                return;
            }
        };
        metrics::record_message(&message_type);

        let snapshot = match self.core.registry.snapshot(connection_id) {
            Some(snapshot) => snapshot,
            // Already torn down; late frame from the reader
            None => return,
        };

        if !SESSION_EXEMPT_TYPES.contains(&message_type.as_str())
            && !self.session_is_live(&snapshot).await
        {
            self.reject_expired(&snapshot).await;
            return;
        }

        let handler = match self.registry.get(&message_type) {
            Some(handler) => handler,
            None => {
                tracing::warn!(
                    connection_id = %connection_id,
                    message_type = %message_type,
                    "Unknown message type"
                );
                return;
            }
        };

        let ctx = HandlerContext {
            core: self.core.clone(),
            connection_id: connection_id.clone(),
            snapshot,
        };

        match handler.handle(&ctx, frame).await {
            Ok(()) => {
                self.record_activity(&ctx, &message_type).await;
            }
            Err(HandlerError::Authorization(reason)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    message_type = %message_type,
                    reason = %reason,
                    "Dropped unauthorized message"
                );
            }
            Err(HandlerError::Malformed(e)) => {
                metrics::record_malformed_message();
                tracing::warn!(
                    connection_id = %connection_id,
                    message_type = %message_type,
                    error = %e,
                    "Ignoring malformed payload"
                );
            }
            Err(HandlerError::Internal(e)) => {
                tracing::error!(
                    connection_id = %connection_id,
                    message_type = %message_type,
                    error = %e,
                    "Handler failed"
                );
            }
        }
    }

    async fn session_is_live(&self, snapshot: &ConnectionSnapshot) -> bool {
        match self.core.sessions.get(&snapshot.session_id).await {
            Ok(Some(row)) => row.is_active,
            Ok(None) => false,
            Err(e) => {
                // Storage trouble must not kick live classrooms out
                tracing::warn!(
                    session_id = %snapshot.session_id,
                    error = %e,
                    "Session liveness check failed, letting the message through"
                );
                true
            }
        }
    }

    async fn reject_expired(&self, snapshot: &ConnectionSnapshot) {
        let message = ServerMessage::SessionExpired {
            code: ERROR_SESSION_EXPIRED.to_string(),
            message: "Your classroom session has expired".to_string(),
        };
        if let Err(e) = send_json(&*snapshot.sink, &message).await {
            tracing::debug!(error = %e, "Failed to send session_expired");
        }
        schedule_close(
            snapshot.sink.clone(),
            close_code::POLICY_VIOLATION,
            "Session expired",
            self.core.settings.timeouts.session_expired_message_delay(),
        );
    }

    async fn record_activity(&self, ctx: &HandlerContext, message_type: &str) {
        // The register ack may precede the row's creation
        if message_type == "register" {
            return;
        }

        if message_type == "audio" {
            let throttle = self.core.settings.timeouts.audio_activity_min_interval();
            let db_backed = matches!(
                self.core.sessions.get(&ctx.snapshot.session_id).await,
                Ok(Some(_))
            );
            if !db_backed
                || !self
                    .core
                    .registry
                    .allow_audio_activity_write(&ctx.connection_id, throttle)
            {
                return;
            }
        }

        if let Err(e) = self
            .core
            .sessions
            .touch_activity(&ctx.snapshot.session_id, chrono::Utc::now())
            .await
        {
            tracing::debug!(
                session_id = %ctx.snapshot.session_id,
                error = %e,
                "Activity update skipped"
            );
        }
    }
}

/// Close the peer after `delay` so the explanatory JSON reliably lands
/// before the socket tear-down.
pub(crate) fn schedule_close(
    sink: Arc<dyn Outbound>,
    code: u16,
    reason: &'static str,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        sink.close(code, reason).await;
    });
}
