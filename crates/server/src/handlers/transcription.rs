//! Transcription handler (teacher text input)

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;

use classbridge_core::{Role, TranslationMode};

use crate::dispatch::{HandlerContext, HandlerError, HandlerResult, MessageHandler};
use crate::handlers::run_fanout;
use crate::protocol::{decode_payload, TranscriptionPayload};

pub struct TranscriptionHandler;

#[async_trait]
impl MessageHandler for TranscriptionHandler {
    fn message_type(&self) -> &'static str {
        "transcription"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        let start = Instant::now();

        if ctx.snapshot.role != Role::Teacher {
            return Err(HandlerError::Authorization(
                "only teachers send transcriptions".to_string(),
            ));
        }

        let payload: TranscriptionPayload = decode_payload(self.message_type(), frame)?;
        if payload.text.trim().is_empty() {
            return Ok(());
        }

        // Manual mode suppresses the automatic fan-out; the teacher picks
        // what to send via send_translation.
        if ctx.snapshot.settings.translation_mode() == TranslationMode::Manual {
            tracing::debug!(
                session_id = %ctx.snapshot.session_id,
                "Manual mode, transcription not fanned out"
            );
            return Ok(());
        }

        let source_language = ctx.snapshot.language.clone();
        run_fanout(ctx, payload.text, source_language, start).await;
        Ok(())
    }
}
