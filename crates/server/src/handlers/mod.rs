//! Protocol message handlers
//!
//! One handler per inbound `type`. Handlers recover every provider and
//! storage failure internally; the only errors they surface are the
//! dispatcher-logged drop reasons (wrong role, malformed payload).

pub mod audio;
pub mod heartbeat;
pub mod manual_send;
pub mod register;
pub mod settings;
pub mod transcription;
pub mod tts_request;
pub mod two_way;

use std::sync::Arc;
use std::time::Instant;

use classbridge_core::{send_json, LanguageTag, Outbound, SessionId, SpeechToText as _};
use classbridge_pipeline::{DeliveryTarget, PipelineInput, PipelineSummary};

use crate::dispatch::{HandlerContext, MessageHandler};
use crate::metrics;
use crate::protocol::ServerMessage;
use crate::rate_limit::RateLimiter;
use crate::state::BrokerCore;

/// Build the full handler set for the dispatcher.
pub fn all(core: &Arc<BrokerCore>) -> Vec<Arc<dyn MessageHandler>> {
    let request_limiter = Arc::new(RateLimiter::new(
        core.settings.limits.student_request_limit,
        core.settings.limits.student_request_window(),
    ));

    vec![
        Arc::new(register::RegisterHandler),
        Arc::new(settings::SettingsHandler),
        Arc::new(heartbeat::PingHandler),
        Arc::new(heartbeat::PongHandler),
        Arc::new(transcription::TranscriptionHandler),
        Arc::new(audio::AudioHandler),
        Arc::new(tts_request::TtsRequestHandler),
        Arc::new(manual_send::ManualSendHandler),
        Arc::new(two_way::StudentRequestHandler::new(request_limiter.clone())),
        Arc::new(two_way::StudentAudioHandler::new(request_limiter)),
        Arc::new(two_way::TeacherReplyHandler),
        Arc::new(two_way::ComprehensionSignalHandler),
    ]
}

/// Send, swallowing failures (the peer may be gone).
pub(crate) async fn send_to(sink: &Arc<dyn Outbound>, message: &ServerMessage) {
    if let Err(e) = send_json(&**sink, message).await {
        tracing::debug!(error = %e, "Outbound send failed");
    }
}

/// Snapshot the session's students into delivery targets plus the set of
/// distinct target languages.
pub(crate) fn fanout_targets(
    core: &BrokerCore,
    session_id: &SessionId,
) -> (Vec<DeliveryTarget>, Vec<LanguageTag>) {
    let (students, languages) = core.registry.students_for_session(session_id);
    let targets = students
        .into_iter()
        .map(|s| DeliveryTarget {
            connection_id: s.connection_id,
            language: s.language,
            settings: s.settings,
            sink: s.sink,
        })
        .collect();
    (targets, languages)
}

/// Run the full fan-out for a teacher utterance.
pub(crate) async fn run_fanout(
    ctx: &HandlerContext,
    text: String,
    source_language: LanguageTag,
    start: Instant,
) -> PipelineSummary {
    let session_id = ctx.snapshot.session_id.clone();
    let (targets, target_languages) = fanout_targets(&ctx.core, &session_id);
    let preparation_ms = start.elapsed().as_millis() as u64;

    let summary = ctx
        .core
        .pipeline
        .run(PipelineInput {
            session_id: Some(session_id),
            text,
            source_language,
            targets,
            target_languages,
            start,
            preparation_ms,
        })
        .await;

    metrics::record_delivery(summary.delivery.delivered, summary.delivery.failed);
    if summary.delivery.delivered > 0 {
        metrics::record_translation_latency(start.elapsed().as_millis() as u64);
    }
    summary
}

/// STT with the configured per-call deadline; failures and timeouts come
/// back as None (the frame is dropped).
pub(crate) async fn transcribe(
    core: &BrokerCore,
    audio: &[u8],
    language: &LanguageTag,
) -> Option<String> {
    let deadline = core.settings.timeouts.provider_timeout();
    match tokio::time::timeout(deadline, core.stt.transcribe(audio, language)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            tracing::warn!(provider = core.stt.name(), error = %e, "STT failed, dropping frame");
            None
        }
        Err(_) => {
            tracing::warn!(provider = core.stt.name(), "STT timed out, dropping frame");
            None
        }
    }
}
