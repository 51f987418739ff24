//! Audio handler (teacher speech input)
//!
//! Non-final chunks feed the throttled interim-transcription path (echo
//! back to the teacher only). Final chunks are length-validated,
//! transcribed, and enter the same fan-out as typed transcriptions.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::time::Instant;

use classbridge_core::{Role, TranslationMode};

use crate::dispatch::{HandlerContext, HandlerError, HandlerResult, MessageHandler};
use crate::handlers::{run_fanout, send_to, transcribe};
use crate::protocol::{decode_payload, now_ms, AudioPayload, ServerMessage};

pub struct AudioHandler;

#[async_trait]
impl MessageHandler for AudioHandler {
    fn message_type(&self) -> &'static str {
        "audio"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        let start = Instant::now();

        // Only teacher audio is processed
        if ctx.snapshot.role != Role::Teacher {
            return Err(HandlerError::Authorization(
                "only teacher audio is processed".to_string(),
            ));
        }

        let payload: AudioPayload = decode_payload(self.message_type(), frame)?;
        let data = match payload.data {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(()),
        };

        if payload.is_final_chunk == Some(false) {
            return self.handle_interim(ctx, &data).await;
        }
        self.handle_final(ctx, &data, start).await
    }
}

impl AudioHandler {
    async fn handle_interim(&self, ctx: &HandlerContext, data: &str) -> HandlerResult {
        let core = &ctx.core;
        if !core.settings.features.interim_transcription {
            return Ok(());
        }
        if !core
            .registry
            .allow_interim(&ctx.connection_id, core.settings.limits.interim_throttle())
        {
            return Ok(());
        }

        let buffer = match BASE64.decode(data) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable interim audio chunk");
                return Ok(());
            }
        };

        if let Some(text) = transcribe(core, &buffer, &ctx.snapshot.language).await {
            // Teacher-only echo; no translation, no fan-out
            send_to(
                ctx.sink(),
                &ServerMessage::Transcription {
                    text,
                    is_final: false,
                    timestamp: now_ms(),
                },
            )
            .await;
        }
        Ok(())
    }

    async fn handle_final(
        &self,
        ctx: &HandlerContext,
        data: &str,
        start: Instant,
    ) -> HandlerResult {
        let core = &ctx.core;
        let limits = &core.settings.limits;

        if data.len() < limits.min_audio_data_length {
            tracing::debug!(
                len = data.len(),
                min = limits.min_audio_data_length,
                "Audio chunk below minimum length, dropped"
            );
            return Ok(());
        }

        let buffer = match BASE64.decode(data) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable audio chunk");
                return Ok(());
            }
        };
        if buffer.len() < limits.min_audio_buffer_length {
            tracing::debug!(
                len = buffer.len(),
                min = limits.min_audio_buffer_length,
                "Decoded audio below minimum length, dropped"
            );
            return Ok(());
        }

        let Some(text) = transcribe(core, &buffer, &ctx.snapshot.language).await else {
            return Ok(());
        };

        if ctx.snapshot.settings.translation_mode() == TranslationMode::Manual {
            // Echo so the teacher can decide what to send manually
            send_to(
                ctx.sink(),
                &ServerMessage::Transcription {
                    text,
                    is_final: true,
                    timestamp: now_ms(),
                },
            )
            .await;
            return Ok(());
        }

        let source_language = ctx.snapshot.language.clone();
        run_fanout(ctx, text, source_language, start).await;
        Ok(())
    }
}
