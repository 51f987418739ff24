//! Settings handler

use async_trait::async_trait;
use serde_json::Value;

use classbridge_core::Role;

use crate::dispatch::{HandlerContext, HandlerResult, MessageHandler};
use crate::handlers::send_to;
use crate::protocol::{decode_payload, ServerMessage, SettingsPayload};

pub struct SettingsHandler;

#[async_trait]
impl MessageHandler for SettingsHandler {
    fn message_type(&self) -> &'static str {
        "settings"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        let payload: SettingsPayload = decode_payload(self.message_type(), frame)?;

        // Legacy top-level ttsServiceType first; the settings object wins
        let mut incoming = payload.settings.unwrap_or_default();
        if let Some(service) = &payload.tts_service_type {
            incoming.apply_legacy_tts_service(service);
        }

        let merged = match ctx
            .core
            .registry
            .merge_settings(&ctx.connection_id, &incoming)
        {
            Some(merged) => merged,
            None => return Ok(()),
        };

        send_to(
            ctx.sink(),
            &ServerMessage::SettingsAck {
                status: "success",
                settings: merged.clone(),
            },
        )
        .await;

        // Students show a manual-mode hint when their teacher flips modes
        if ctx.snapshot.role == Role::Teacher {
            let mode = merged.translation_mode().as_str();
            let (students, _) = ctx
                .core
                .registry
                .students_for_session(&ctx.snapshot.session_id);
            let notice = ServerMessage::TeacherMode {
                mode: if mode == "manual" { "manual" } else { "auto" },
            };
            for student in students {
                send_to(&student.sink, &notice).await;
            }
        }

        Ok(())
    }
}
