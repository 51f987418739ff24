//! Register handler
//!
//! The protocol's front door: assigns role and language, resolves which
//! session the connection belongs to (classroom code for students,
//! reconnect/reactivate for teachers), and hands back the classroom code.
//!
//! Teacher-branch failures after the role is set are logged and skipped;
//! the teacher still gets an ack.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use classbridge_core::{close_code, ClientSettings, LanguageTag, Role, SessionId, TranslationMode};
use classbridge_storage::{SessionRecord, SessionStore as _};

use crate::classroom::CodeEntry;
use crate::dispatch::{schedule_close, HandlerContext, HandlerError, HandlerResult, MessageHandler};
use crate::handlers::send_to;
use crate::metrics;
use crate::protocol::{
    decode_payload, RegisterAckData, RegisterPayload, ServerMessage, StudentJoinedPayload,
    ERROR_INVALID_CLASSROOM,
};

pub struct RegisterHandler;

#[async_trait]
impl MessageHandler for RegisterHandler {
    fn message_type(&self) -> &'static str {
        "register"
    }

    async fn handle(&self, ctx: &HandlerContext, frame: Value) -> HandlerResult {
        let payload: RegisterPayload = decode_payload(self.message_type(), frame)?;
        match payload.role.as_str() {
            "teacher" => register_teacher(ctx, payload).await,
            "student" => register_student(ctx, payload).await,
            other => Err(HandlerError::Authorization(format!(
                "unknown role: {other}"
            ))),
        }
    }
}

fn merged_settings(ctx: &HandlerContext, payload: &RegisterPayload) -> ClientSettings {
    // Legacy top-level ttsServiceType first; the settings object wins
    let mut incoming = payload.settings.clone().unwrap_or_default();
    if let Some(service) = &payload.tts_service_type {
        incoming.apply_legacy_tts_service(service);
    }
    ctx.core
        .registry
        .merge_settings(&ctx.connection_id, &incoming)
        .unwrap_or(incoming)
}

async fn register_teacher(ctx: &HandlerContext, payload: RegisterPayload) -> HandlerResult {
    let core = &ctx.core;
    match core.registry.set_role(&ctx.connection_id, Role::Teacher) {
        crate::registry::RoleOutcome::Locked(role) => {
            return Err(HandlerError::Authorization(format!(
                "role locked to {}",
                role.as_str()
            )));
        }
        crate::registry::RoleOutcome::UnknownConnection => return Ok(()),
        _ => {}
    }
    metrics::record_connection_opened("teacher");

    let language = payload
        .language_code
        .as_deref()
        .map(LanguageTag::new)
        .unwrap_or_else(|| ctx.snapshot.language.clone());
    if !language.is_empty() {
        core.registry.set_language(&ctx.connection_id, language.clone());
    }
    let settings = merged_settings(ctx, &payload);

    // Reconnection: an active session with the same teacher id wins, then
    // a recently ended one within the grace window, then (without a
    // teacher id) a language match.
    let now = Utc::now();
    let mut session_id = ctx.snapshot.session_id.clone();
    if let Some(teacher_id) = &payload.teacher_id {
        match core.sessions.find_active_by_teacher(teacher_id).await {
            Ok(Some(row)) if row.session_id != session_id => {
                tracing::info!(
                    teacher_id,
                    from = %session_id,
                    to = %row.session_id,
                    "Teacher reconnected to active session"
                );
                core.registry
                    .update_session_id(&ctx.connection_id, row.session_id.clone());
                core.codes.clear_for_session(&session_id);
                session_id = row.session_id;
                if let Err(e) = core.sessions.touch_activity(&session_id, now).await {
                    tracing::warn!(session_id = %session_id, error = %e, "Activity update failed");
                }
            }
            Ok(_) => {
                if let Some(revived) = core.lifecycle.try_reactivate(teacher_id, now).await {
                    core.registry
                        .update_session_id(&ctx.connection_id, revived.session_id.clone());
                    session_id = revived.session_id;
                }
            }
            Err(e) => {
                tracing::warn!(teacher_id, error = %e, "Teacher reconnect lookup failed");
            }
        }
    } else if !language.is_empty() {
        match core.sessions.find_active_by_teacher_language(&language).await {
            Ok(Some(row)) if row.session_id != session_id => {
                tracing::info!(
                    language = %language,
                    to = %row.session_id,
                    "Teacher rejoined session by language match"
                );
                core.registry
                    .update_session_id(&ctx.connection_id, row.session_id.clone());
                session_id = row.session_id;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Language-match lookup failed");
            }
        }
    }

    // Ensure the session row exists
    match core.sessions.get(&session_id).await {
        Ok(None) => {
            let mut record = SessionRecord::new(session_id.clone(), now);
            record.teacher_id = payload.teacher_id.clone();
            if !language.is_empty() {
                record.teacher_language = Some(language.clone());
            }
            if let Err(e) = core.sessions.create(record).await {
                tracing::error!(session_id = %session_id, error = %e, "Failed to create session");
            }
        }
        Ok(Some(_)) => {}
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Session lookup failed");
        }
    }

    let code_entry = resolve_classroom_code(ctx, &session_id).await;
    if let Some(entry) = &code_entry {
        core.registry
            .set_classroom_code(&ctx.connection_id, Some(entry.code.clone()));
    }

    send_to(
        ctx.sink(),
        &ServerMessage::RegisterAck {
            status: "success",
            data: RegisterAckData {
                role: "teacher".to_string(),
                language_code: language.to_string(),
                settings,
            },
        },
    )
    .await;

    if let Some(entry) = code_entry {
        send_to(
            ctx.sink(),
            &ServerMessage::ClassroomCode {
                code: entry.code,
                session_id: session_id.to_string(),
                expires_at: entry.expires_at.timestamp_millis(),
            },
        )
        .await;
    }

    Ok(())
}

/// The authoritative classroom code for a session: the one persisted on
/// the row wins; otherwise a freshly generated one is persisted.
async fn resolve_classroom_code(ctx: &HandlerContext, session_id: &SessionId) -> Option<CodeEntry> {
    let core = &ctx.core;

    let persisted = match core.sessions.get(session_id).await {
        Ok(Some(row)) => row.class_code,
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Code lookup failed");
            None
        }
    };

    if let Some(code) = persisted {
        match core.codes.restore_code(&code, session_id) {
            Ok(entry) => return Some(entry),
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    code,
                    error = %e,
                    "Persisted code unusable, generating a new one"
                );
            }
        }
    }

    match core.codes.generate_code(session_id) {
        Ok(entry) => {
            if let Err(e) = core
                .sessions
                .set_class_code(session_id, Some(entry.code.clone()))
                .await
            {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to persist code");
            }
            Some(entry)
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Classroom code generation failed");
            None
        }
    }
}

async fn register_student(ctx: &HandlerContext, payload: RegisterPayload) -> HandlerResult {
    let core = &ctx.core;

    // Query-param code (connection attribute) or the register payload
    let code = payload
        .classroom_code
        .clone()
        .or_else(|| ctx.snapshot.classroom_code.clone());

    if let Some(code) = &code {
        if !core.codes.is_valid(code) {
            tracing::info!(code, "Rejecting student with invalid classroom code");
            send_to(
                ctx.sink(),
                &ServerMessage::Error {
                    code: ERROR_INVALID_CLASSROOM.to_string(),
                    message: "Invalid or expired classroom code".to_string(),
                },
            )
            .await;
            schedule_close(
                ctx.sink().clone(),
                close_code::POLICY_VIOLATION,
                "Invalid classroom",
                core.settings.timeouts.invalid_classroom_message_delay(),
            );
            return Ok(());
        }
    }

    match core.registry.set_role(&ctx.connection_id, Role::Student) {
        crate::registry::RoleOutcome::Locked(role) => {
            return Err(HandlerError::Authorization(format!(
                "role locked to {}",
                role.as_str()
            )));
        }
        crate::registry::RoleOutcome::UnknownConnection => return Ok(()),
        _ => {}
    }
    metrics::record_connection_opened("student");

    let language = payload
        .language_code
        .as_deref()
        .map(LanguageTag::new)
        .unwrap_or_else(|| ctx.snapshot.language.clone());
    if !language.is_empty() {
        core.registry.set_language(&ctx.connection_id, language.clone());
    }
    core.registry
        .set_name(&ctx.connection_id, payload.name.clone());
    let settings = merged_settings(ctx, &payload);

    // Prefer the code's session over the one assigned at accept
    let mut session_id = ctx.snapshot.session_id.clone();
    if let Some(code) = &code {
        if let Some(mapped) = core.codes.session_for_code(code) {
            if mapped != session_id {
                core.registry
                    .update_session_id(&ctx.connection_id, mapped.clone());
                session_id = mapped;
            }
        }
    }
    core.registry
        .set_classroom_code(&ctx.connection_id, code.clone());

    let now = Utc::now();
    let mut student_count = None;
    if core.registry.mark_student_counted(&ctx.connection_id) {
        // Teacher-absent classrooms get their row at first student join
        if matches!(core.sessions.get(&session_id).await, Ok(None)) {
            let mut record = SessionRecord::new(session_id.clone(), now);
            record.class_code = code.clone();
            record.student_language = Some(language.clone());
            if let Err(e) = core.sessions.create(record).await {
                tracing::error!(session_id = %session_id, error = %e, "Failed to create session");
            }
        }
        match core.sessions.add_student(&session_id, &language, now).await {
            Ok(count) => student_count = Some(count),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Student count update failed");
            }
        }
    }

    send_to(
        ctx.sink(),
        &ServerMessage::RegisterAck {
            status: "success",
            data: RegisterAckData {
                role: "student".to_string(),
                language_code: language.to_string(),
                settings,
            },
        },
    )
    .await;

    // Ephemeral per-message identifier; the routing table holds the real
    // connection mapping
    let student_id = uuid::Uuid::new_v4().to_string();
    let teachers = core.registry.teachers_for_session(&session_id);
    let joined = ServerMessage::StudentJoined {
        payload: StudentJoinedPayload {
            student_id,
            name: payload.name.clone(),
            language_code: language.to_string(),
        },
    };
    for teacher in &teachers {
        send_to(&teacher.sink, &joined).await;

        if teacher.settings.translation_mode() == TranslationMode::Manual {
            send_to(ctx.sink(), &ServerMessage::TeacherMode { mode: "manual" }).await;
        }
    }

    if let Some(count) = student_count {
        let update = ServerMessage::StudentCountUpdate { count };
        for teacher in &teachers {
            send_to(&teacher.sink, &update).await;
        }
    }

    tracing::info!(
        session_id = %session_id,
        language = %language,
        "Student joined classroom"
    );
    Ok(())
}
