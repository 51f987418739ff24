//! Ping/pong handlers
//!
//! Either direction restores the health monitor's isAlive flag. Pings are
//! exempt from session validation so a peer can keep its socket warm
//! while idle.

use async_trait::async_trait;
use serde_json::Value;

use crate::dispatch::{HandlerContext, HandlerResult, MessageHandler};
use crate::handlers::send_to;
use crate::protocol::{decode_payload, now_ms, PingPayload, ServerMessage};

pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    fn message_type(&self) -> &'static str {
        "ping"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        let payload: PingPayload = decode_payload(self.message_type(), frame)?;
        ctx.core.registry.set_alive(&ctx.connection_id, true);

        send_to(
            ctx.sink(),
            &ServerMessage::Pong {
                timestamp: now_ms(),
                original_timestamp: payload.timestamp,
            },
        )
        .await;
        Ok(())
    }
}

pub struct PongHandler;

#[async_trait]
impl MessageHandler for PongHandler {
    fn message_type(&self) -> &'static str {
        "pong"
    }

    async fn handle(&self, ctx: &HandlerContext, _frame: Value) -> HandlerResult {
        ctx.core.registry.set_alive(&ctx.connection_id, true);
        Ok(())
    }
}
