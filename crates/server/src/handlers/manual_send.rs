//! Manual send handler
//!
//! In manual mode the teacher reviews transcriptions client-side and
//! releases them one at a time; this runs the same fan-out as automatic
//! transcription.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;

use classbridge_core::Role;

use crate::dispatch::{HandlerContext, HandlerError, HandlerResult, MessageHandler};
use crate::handlers::{run_fanout, send_to};
use crate::protocol::{decode_payload, ManualSendPayload, ServerMessage};

pub struct ManualSendHandler;

#[async_trait]
impl MessageHandler for ManualSendHandler {
    fn message_type(&self) -> &'static str {
        "send_translation"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        let start = Instant::now();

        if !ctx.core.settings.features.manual_translation_control {
            send_to(
                ctx.sink(),
                &ServerMessage::ManualSendAck {
                    status: "error",
                    message: Some("manual translation control is disabled".to_string()),
                },
            )
            .await;
            return Ok(());
        }

        if ctx.snapshot.role != Role::Teacher {
            return Err(HandlerError::Authorization(
                "only teachers send translations".to_string(),
            ));
        }

        let payload: ManualSendPayload = decode_payload(self.message_type(), frame)?;
        if payload.text.trim().is_empty() {
            send_to(
                ctx.sink(),
                &ServerMessage::ManualSendAck {
                    status: "error",
                    message: Some("text is required".to_string()),
                },
            )
            .await;
            return Ok(());
        }

        let source_language = ctx.snapshot.language.clone();
        run_fanout(ctx, payload.text, source_language, start).await;

        send_to(
            ctx.sink(),
            &ServerMessage::ManualSendAck {
                status: "ok",
                message: None,
            },
        )
        .await;
        Ok(())
    }
}
