//! Two-way messaging handlers
//!
//! Feature-gated student-to-teacher channel: rate-limited text requests
//! (typed or spoken), teacher replies scoped to the class or privately to
//! one student, and comprehension signals relayed to teachers.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use classbridge_core::{LanguageTag, Outbound as _, RequestId, Role, SessionId};
use classbridge_pipeline::{DeliveryTarget, PipelineInput};

use crate::dispatch::{HandlerContext, HandlerError, HandlerResult, MessageHandler};
use crate::handlers::{run_fanout, send_to, transcribe};
use crate::protocol::{
    decode_payload, now_ms, ComprehensionSignalPayload, ServerMessage, StudentRequestBroadcast,
    StudentRequestPayload, TeacherReplyPayload,
};
use crate::rate_limit::RateLimiter;
use crate::state::BrokerCore;

fn two_way_enabled(ctx: &HandlerContext) -> bool {
    ctx.core.settings.features.two_way
        || ctx.snapshot.two_way
        || ctx.snapshot.settings.two_way_enabled()
}

/// Broadcast a student request to the session's teachers, registering the
/// reply route first. When no teacher is connected yet the broadcast is
/// retried a few times before giving up.
async fn submit_student_request(
    ctx: &HandlerContext,
    limiter: &RateLimiter,
    text: String,
    visibility: Option<String>,
) -> HandlerResult {
    let core = &ctx.core;

    if let Err(e) = limiter.check(&ctx.connection_id) {
        tracing::warn!(connection_id = %ctx.connection_id, error = %e, "Student request throttled");
        send_to(
            ctx.sink(),
            &ServerMessage::Error {
                code: "RATE_LIMITED".to_string(),
                message: "Too many requests, slow down".to_string(),
            },
        )
        .await;
        return Ok(());
    }

    let session_id = ctx.snapshot.session_id.clone();
    let request_id = RequestId::generate();
    core.routing.register(
        session_id.clone(),
        request_id.clone(),
        ctx.connection_id.clone(),
        ctx.sink().clone(),
    );

    let broadcast = ServerMessage::StudentRequest {
        payload: StudentRequestBroadcast {
            request_id: request_id.to_string(),
            student_id: ctx.connection_id.to_string(),
            name: ctx.snapshot.name.clone(),
            language_code: ctx.snapshot.language.to_string(),
            text,
            visibility: visibility.unwrap_or_else(|| "private".to_string()),
        },
    };

    let teachers = core.registry.teachers_for_session(&session_id);
    if !teachers.is_empty() {
        for teacher in teachers {
            send_to(&teacher.sink, &broadcast).await;
        }
        return Ok(());
    }

    // No teacher yet; retry delivery in the background
    let core = core.clone();
    let attempts = core.settings.limits.teacher_retry_attempts;
    let interval = core.settings.limits.teacher_retry_interval();
    tokio::spawn(async move {
        for _ in 0..attempts {
            tokio::time::sleep(interval).await;
            let teachers = core.registry.teachers_for_session(&session_id);
            if !teachers.is_empty() {
                for teacher in teachers {
                    send_to(&teacher.sink, &broadcast).await;
                }
                return;
            }
        }
        tracing::debug!(session_id = %session_id, "Student request undeliverable, no teacher");
    });
    Ok(())
}

pub struct StudentRequestHandler {
    limiter: Arc<RateLimiter>,
}

impl StudentRequestHandler {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl MessageHandler for StudentRequestHandler {
    fn message_type(&self) -> &'static str {
        "student_request"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        if ctx.snapshot.role != Role::Student {
            return Err(HandlerError::Authorization(
                "only students send requests".to_string(),
            ));
        }
        if !two_way_enabled(ctx) {
            tracing::debug!("Two-way messaging disabled, request dropped");
            return Ok(());
        }

        let payload: StudentRequestPayload = decode_payload(self.message_type(), frame)?;
        if payload.text.trim().is_empty() {
            return Ok(());
        }
        submit_student_request(ctx, &self.limiter, payload.text, payload.visibility).await
    }
}

pub struct StudentAudioHandler {
    limiter: Arc<RateLimiter>,
}

impl StudentAudioHandler {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl MessageHandler for StudentAudioHandler {
    fn message_type(&self) -> &'static str {
        "student_audio"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        if ctx.snapshot.role != Role::Student {
            return Err(HandlerError::Authorization(
                "only students send student audio".to_string(),
            ));
        }
        if !two_way_enabled(ctx) {
            return Ok(());
        }

        let payload: crate::protocol::AudioPayload = decode_payload(self.message_type(), frame)?;
        let data = match payload.data {
            Some(data) if data.len() >= ctx.core.settings.limits.min_audio_data_length => data,
            _ => return Ok(()),
        };
        let buffer = match BASE64.decode(&data) {
            Ok(buffer) if buffer.len() >= ctx.core.settings.limits.min_audio_buffer_length => {
                buffer
            }
            Ok(_) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable student audio");
                return Ok(());
            }
        };

        let Some(text) = transcribe(&ctx.core, &buffer, &ctx.snapshot.language).await else {
            return Ok(());
        };
        submit_student_request(ctx, &self.limiter, text, None).await
    }
}

pub struct TeacherReplyHandler;

#[async_trait]
impl MessageHandler for TeacherReplyHandler {
    fn message_type(&self) -> &'static str {
        "teacher_reply"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        let start = Instant::now();

        if ctx.snapshot.role != Role::Teacher {
            return Err(HandlerError::Authorization(
                "only teachers reply".to_string(),
            ));
        }
        if !two_way_enabled(ctx) {
            return Ok(());
        }

        let payload: TeacherReplyPayload = decode_payload(self.message_type(), frame)?;
        if payload.text.trim().is_empty() {
            return Ok(());
        }

        match payload.scope.as_deref() {
            Some("private") => {
                let Some(request_id) = payload.request_id else {
                    tracing::warn!("Private reply without requestId, dropped");
                    return Ok(());
                };
                reply_private(
                    &ctx.core,
                    &ctx.snapshot.session_id,
                    &ctx.snapshot.language,
                    RequestId::from(request_id),
                    payload.text,
                    start,
                )
                .await;
            }
            // Class scope uses the normal per-student fan-out
            _ => {
                let source_language = ctx.snapshot.language.clone();
                run_fanout(ctx, payload.text, source_language, start).await;
            }
        }
        Ok(())
    }
}

/// Translate and deliver one private reply via the request routing map.
async fn reply_private(
    core: &Arc<BrokerCore>,
    session_id: &SessionId,
    teacher_language: &LanguageTag,
    request_id: RequestId,
    text: String,
    start: Instant,
) {
    let Some(route) = core.routing.take(session_id, &request_id) else {
        tracing::warn!(
            session_id = %session_id,
            request_id = %request_id,
            "No route for private reply"
        );
        return;
    };

    let Some(student) = core.registry.snapshot(&route.connection_id) else {
        tracing::debug!(
            request_id = %request_id,
            "Student left before the private reply"
        );
        return;
    };

    let target = DeliveryTarget {
        connection_id: student.connection_id,
        language: student.language.clone(),
        settings: student.settings,
        sink: student.sink,
    };
    let preparation_ms = start.elapsed().as_millis() as u64;

    core.pipeline
        .run(PipelineInput {
            session_id: Some(session_id.clone()),
            text,
            source_language: teacher_language.clone(),
            targets: vec![target],
            target_languages: vec![student.language],
            start,
            preparation_ms,
        })
        .await;
}

pub struct ComprehensionSignalHandler;

#[async_trait]
impl MessageHandler for ComprehensionSignalHandler {
    fn message_type(&self) -> &'static str {
        "comprehension_signal"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        if ctx.snapshot.role != Role::Student {
            return Err(HandlerError::Authorization(
                "only students emit comprehension signals".to_string(),
            ));
        }
        if !two_way_enabled(ctx) {
            return Ok(());
        }
        // Signals are opt-in per student
        if !ctx.snapshot.settings.allow_comprehension_signals() {
            tracing::debug!("Comprehension signals not opted in, dropped");
            return Ok(());
        }

        let payload: ComprehensionSignalPayload =
            decode_payload(self.message_type(), frame.clone())?;

        // Relay the frame to teachers as-is
        let relay = frame.to_string();
        let teachers = ctx
            .core
            .registry
            .teachers_for_session(&ctx.snapshot.session_id);
        for teacher in &teachers {
            if let Err(e) = teacher.sink.send_text(relay.clone()).await {
                tracing::debug!(error = %e, "Comprehension signal relay failed");
            }

            // Opt-in hint for teachers watching comprehension
            if payload.signal.as_deref() == Some("confused")
                && teacher.settings.ace_enabled.unwrap_or(false)
            {
                send_to(
                    &teacher.sink,
                    &ServerMessage::AceHint {
                        hint: "A student signalled they are lost; consider slowing down"
                            .to_string(),
                        timestamp: now_ms(),
                    },
                )
                .await;
            }
        }
        Ok(())
    }
}
