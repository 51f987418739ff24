//! On-demand TTS handler

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;

use classbridge_core::{LanguageTag, SynthesisOptions};

use crate::dispatch::{HandlerContext, HandlerResult, MessageHandler};
use crate::handlers::send_to;
use crate::protocol::{decode_payload, now_ms, ServerMessage, TtsError, TtsRequestPayload};

pub struct TtsRequestHandler;

#[async_trait]
impl MessageHandler for TtsRequestHandler {
    fn message_type(&self) -> &'static str {
        "tts_request"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        let payload: TtsRequestPayload = decode_payload(self.message_type(), frame)?;

        if payload.text.trim().is_empty() || payload.language_code.trim().is_empty() {
            send_to(
                ctx.sink(),
                &ServerMessage::TtsResponse {
                    status: "error",
                    text: None,
                    language_code: None,
                    tts_service_type: None,
                    audio_data: None,
                    use_client_speech: None,
                    speech_params: None,
                    error: Some(TtsError {
                        code: "INVALID_REQUEST".to_string(),
                        message: "text and languageCode are required".to_string(),
                    }),
                    timestamp: now_ms(),
                },
            )
            .await;
            return Ok(());
        }

        let language = LanguageTag::new(&payload.language_code);
        let mut options = SynthesisOptions::new(language.clone());
        if let Some(voice) = &payload.voice {
            options = options.with_voice(voice.clone());
        }

        // Request field, then the connection's settings, then the default
        let requested = payload
            .tts_service_type
            .clone()
            .or_else(|| ctx.snapshot.settings.tts_service_type.clone());

        let result = ctx
            .core
            .tts
            .synthesize(requested.as_deref(), &payload.text, &options)
            .await;

        let response = if result.is_client_side() {
            let speech_text = result
                .client_side_text
                .clone()
                .unwrap_or_else(|| payload.text.clone());
            ServerMessage::TtsResponse {
                status: "success",
                text: Some(payload.text.clone()),
                language_code: Some(language.to_string()),
                tts_service_type: Some(result.service_type.clone()),
                audio_data: None,
                use_client_speech: Some(true),
                speech_params: Some(serde_json::json!({
                    "type": "browser-speech",
                    "text": speech_text,
                    "languageCode": language.to_string(),
                    "autoPlay": true,
                })),
                error: None,
                timestamp: now_ms(),
            }
        } else if result.audio.is_empty() {
            ServerMessage::TtsResponse {
                status: "error",
                text: Some(payload.text.clone()),
                language_code: Some(language.to_string()),
                tts_service_type: Some(result.service_type.clone()),
                audio_data: None,
                use_client_speech: None,
                speech_params: None,
                error: Some(TtsError {
                    code: "SYNTHESIS_FAILED".to_string(),
                    message: "No TTS provider produced audio".to_string(),
                }),
                timestamp: now_ms(),
            }
        } else {
            ServerMessage::TtsResponse {
                status: "success",
                text: Some(payload.text.clone()),
                language_code: Some(language.to_string()),
                tts_service_type: Some(result.service_type.clone()),
                audio_data: Some(BASE64.encode(&result.audio)),
                use_client_speech: None,
                speech_params: None,
                error: None,
                timestamp: now_ms(),
            }
        };

        send_to(ctx.sink(), &response).await;
        Ok(())
    }
}
