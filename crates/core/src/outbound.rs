//! Outbound message sink
//!
//! Delivery and handlers talk to peers through this trait instead of a
//! concrete socket type. The server implements it over the per-connection
//! writer task; tests implement it with an in-memory recorder.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// WebSocket close codes the broker uses.
pub mod close_code {
    /// Normal shutdown
    pub const NORMAL: u16 = 1000;
    /// Invalid classroom session / session expired
    pub const POLICY_VIOLATION: u16 = 1008;
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("send failed: {0}")]
    Io(String),

    #[error("serialization failed: {0}")]
    Serialize(String),
}

/// One peer's outbound half.
///
/// Sends to a closed peer return `SendError::Closed`; callers swallow the
/// error (in-flight work must never crash on a vanished socket).
#[async_trait]
pub trait Outbound: Send + Sync + 'static {
    /// Send a JSON text frame
    async fn send_text(&self, payload: String) -> Result<(), SendError>;

    /// Send a control-frame ping
    async fn send_ping(&self) -> Result<(), SendError>;

    /// Close the connection with a code and reason. Idempotent.
    async fn close(&self, code: u16, reason: &str);

    /// Hard-terminate without a close handshake (dead peer cleanup)
    async fn terminate(&self);
}

/// Serialize-and-send helper shared by all call sites.
pub async fn send_json<T: Serialize + Sync>(
    sink: &dyn Outbound,
    message: &T,
) -> Result<(), SendError> {
    let payload =
        serde_json::to_string(message).map_err(|e| SendError::Serialize(e.to_string()))?;
    sink.send_text(payload).await
}
