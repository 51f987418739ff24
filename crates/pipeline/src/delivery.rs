//! Per-student delivery
//!
//! One task per student connection: pick the synthesis path from the
//! student's settings, normalize audio, compose the `translation` message,
//! send with bounded retries, and only then record the translation.
//! A student's failure never touches the other students' tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use tokio::task::JoinSet;

use classbridge_core::{
    send_json, AudioTranscoder, ClientSettings, ConnectionId, LanguageTag, LatencyComponents,
    LatencyReport, Outbound, SessionId, SynthesisOptions,
};
use classbridge_storage::{TranslationRecord, TranslationStore};

use crate::audio::{normalize_for_delivery, AudioFormat};
use crate::redact::TextSanitizer;
use crate::translate::TranslationOutcome;
use crate::tts::TtsRouter;

const SEND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Snapshot of one student at fan-out time.
///
/// Taken from the connection registry before delivery starts; delivery
/// never reaches back into shared state.
#[derive(Clone)]
pub struct DeliveryTarget {
    pub connection_id: ConnectionId,
    pub language: LanguageTag,
    pub settings: ClientSettings,
    pub sink: Arc<dyn Outbound>,
}

/// Client-side synthesis parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechParams {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    pub language_code: String,
    pub auto_play: bool,
}

impl SpeechParams {
    pub fn browser_speech(text: impl Into<String>, language: &LanguageTag) -> Self {
        Self {
            kind: "browser-speech",
            text: text.into(),
            language_code: language.to_string(),
            auto_play: true,
        }
    }
}

/// The `translation` message delivered to one student.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    pub original_text: String,
    pub source_language: String,
    pub target_language: String,
    pub tts_service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<&'static str>,
    pub latency: LatencyReport,
    pub audio_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_client_speech: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_params: Option<SpeechParams>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub delivered: u32,
    pub failed: u32,
    pub skipped: u32,
}

pub struct DeliveryService {
    tts: Arc<TtsRouter>,
    transcoder: Arc<dyn AudioTranscoder>,
    translations: Arc<dyn TranslationStore>,
    sanitizer: Option<Arc<TextSanitizer>>,
    send_attempts: u32,
    detailed_logging: bool,
}

impl DeliveryService {
    pub fn new(
        tts: Arc<TtsRouter>,
        transcoder: Arc<dyn AudioTranscoder>,
        translations: Arc<dyn TranslationStore>,
        sanitizer: Option<Arc<TextSanitizer>>,
        send_attempts: u32,
        detailed_logging: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            tts,
            transcoder,
            translations,
            sanitizer,
            send_attempts: send_attempts.max(1),
            detailed_logging,
        })
    }

    /// Fan translated text out to every student, in parallel.
    pub async fn deliver(
        self: Arc<Self>,
        session_id: Option<SessionId>,
        original_text: &str,
        source_language: &LanguageTag,
        targets: Vec<DeliveryTarget>,
        outcome: &TranslationOutcome,
        start: Instant,
        preparation_ms: u64,
    ) -> DeliverySummary {
        let mut tasks = JoinSet::new();
        let mut summary = DeliverySummary::default();

        for target in targets {
            if target.language.is_empty() {
                tracing::debug!(
                    connection_id = %target.connection_id,
                    "Student has no language yet, skipping delivery"
                );
                summary.skipped += 1;
                continue;
            }

            let service = self.clone();
            let session_id = session_id.clone();
            let original = original_text.to_string();
            let source = source_language.clone();
            let text = outcome.text_for(&target.language, original_text).to_string();
            let translation_ms = outcome.elapsed_ms;

            tasks.spawn(async move {
                service
                    .deliver_one(
                        session_id,
                        original,
                        source,
                        target,
                        text,
                        start,
                        preparation_ms,
                        translation_ms,
                    )
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => summary.delivered += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    // A panicked delivery task counts as a failed send
                    tracing::error!(error = %e, "Delivery task aborted");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver_one(
        &self,
        session_id: Option<SessionId>,
        original_text: String,
        source_language: LanguageTag,
        target: DeliveryTarget,
        translated_text: String,
        start: Instant,
        preparation_ms: u64,
        translation_ms: u64,
    ) -> bool {
        let processing_started = Instant::now();

        // Feature-gated sanitation of what the student will see and hear
        let text = match &self.sanitizer {
            Some(sanitizer) => {
                let outcome = sanitizer.sanitize(&translated_text);
                if outcome.pii_redacted || outcome.profanity_redacted {
                    tracing::info!(
                        connection_id = %target.connection_id,
                        pii = outcome.pii_redacted,
                        profanity = outcome.profanity_redacted,
                        "Sanitized delivered text"
                    );
                }
                outcome.text
            }
            None => translated_text,
        };

        let use_client_speech =
            target.settings.use_client_speech() || target.settings.low_literacy_mode();

        let mut tts_ms = 0u64;
        let (audio_data, audio_format, service_type, speech_params);

        if use_client_speech {
            audio_data = String::new();
            audio_format = AudioFormat::Browser;
            service_type = "browser".to_string();
            speech_params = Some(SpeechParams::browser_speech(text.clone(), &target.language));
        } else {
            let tts_started = Instant::now();
            let options = SynthesisOptions::new(target.language.clone());
            let result = self
                .tts
                .synthesize(target.settings.tts_service_type.as_deref(), &text, &options)
                .await;
            tts_ms = tts_started.elapsed().as_millis() as u64;

            if result.is_client_side() {
                let speech_text = result.client_side_text.unwrap_or_else(|| text.clone());
                let speech_language = result
                    .client_side_language
                    .unwrap_or_else(|| target.language.clone());
                audio_data = String::new();
                audio_format = AudioFormat::Browser;
                service_type = result.service_type;
                speech_params = Some(SpeechParams::browser_speech(speech_text, &speech_language));
            } else {
                let (audio, format) =
                    normalize_for_delivery(result.audio, &result.service_type, &*self.transcoder);
                audio_data = BASE64.encode(audio);
                audio_format = format;
                service_type = result.service_type;
                speech_params = None;
            }
        }

        let use_client_speech_flag = speech_params.is_some();
        let components = LatencyComponents {
            preparation: preparation_ms,
            translation: translation_ms,
            tts: tts_ms,
            processing: (processing_started.elapsed().as_millis() as u64).saturating_sub(tts_ms),
            network: 0,
        };
        let latency = LatencyReport::complete(start, components);

        let message = TranslationMessage {
            kind: "translation",
            text: text.clone(),
            original_text: original_text.clone(),
            source_language: source_language.to_string(),
            target_language: target.language.to_string(),
            tts_service_type: service_type,
            audio_format: Some(audio_format.as_str()),
            latency,
            audio_data,
            use_client_speech: use_client_speech_flag.then_some(true),
            speech_params,
        };

        if !self.send_with_retries(&target, &message).await {
            return false;
        }

        // Persist only after the send succeeded
        if self.detailed_logging {
            if let Some(session_id) = session_id {
                let record = TranslationRecord {
                    session_id,
                    source_language,
                    target_language: target.language.clone(),
                    original_text,
                    translated_text: text,
                    latency_ms: message.latency.total,
                    created_at: chrono::Utc::now(),
                };
                if let Err(e) = self.translations.record(record).await {
                    tracing::warn!(
                        connection_id = %target.connection_id,
                        error = %e,
                        "Failed to persist delivered translation"
                    );
                }
            }
        }

        true
    }

    async fn send_with_retries(
        &self,
        target: &DeliveryTarget,
        message: &TranslationMessage,
    ) -> bool {
        for attempt in 1..=self.send_attempts {
            match send_json(&*target.sink, message).await {
                Ok(()) => return true,
                Err(e) if attempt < self.send_attempts => {
                    tracing::debug!(
                        connection_id = %target.connection_id,
                        attempt = attempt,
                        error = %e,
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(SEND_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %target.connection_id,
                        attempts = self.send_attempts,
                        error = %e,
                        "Dropping student after repeated send failures"
                    );
                }
            }
        }
        false
    }
}
