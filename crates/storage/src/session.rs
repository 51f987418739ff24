//! Session rows and the session store interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbridge_core::{LanguageTag, SessionId};

use crate::StorageResult;

/// Why a session ended, or how it classified for analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionQuality {
    #[default]
    Unknown,
    Real,
    NoStudents,
    NoActivity,
    TooShort,
}

impl SessionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Real => "real",
            Self::NoStudents => "no_students",
            Self::NoActivity => "no_activity",
            Self::TooShort => "too_short",
        }
    }
}

/// One persisted classroom session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Live classroom code, if one is issued
    pub class_code: Option<String>,
    /// Stable teacher identity for reconnection, when the client sends one
    pub teacher_id: Option<String>,
    pub teacher_language: Option<LanguageTag>,
    /// Most recent student language
    pub student_language: Option<LanguageTag>,
    /// Currently counted students (idempotent per connection)
    pub students_count: u32,
    pub total_translations: u64,
    /// Final teacher transcriptions that entered the pipeline
    pub transcript_count: u64,
    /// Creation time; reset when the first student joins
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub quality: SessionQuality,
    /// NULL means "never had students"; set to a grace-period note when
    /// the count first drops to zero. This is the EmptyTeacher/Abandoned
    /// handoff marker.
    pub quality_reason: Option<String>,
}

impl SessionRecord {
    pub fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            class_code: None,
            teacher_id: None,
            teacher_language: None,
            student_language: None,
            students_count: 0,
            total_translations: 0,
            transcript_count: 0,
            start_time: now,
            end_time: None,
            last_activity_at: None,
            is_active: true,
            quality: SessionQuality::Unknown,
            quality_reason: None,
        }
    }

    /// Session duration so far, in seconds.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_seconds()
    }
}

/// Durable session rows.
///
/// The broker assumes single-row updates are atomic. Mutations on an
/// unknown session return `StorageError::NotFound` except where noted.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, record: SessionRecord) -> StorageResult<()>;

    async fn get(&self, id: &SessionId) -> StorageResult<Option<SessionRecord>>;

    /// Active session for a teacher identity, if any
    async fn find_active_by_teacher(&self, teacher_id: &str)
        -> StorageResult<Option<SessionRecord>>;

    /// Most recently ended session for a teacher identity
    async fn find_recent_inactive_by_teacher(
        &self,
        teacher_id: &str,
    ) -> StorageResult<Option<SessionRecord>>;

    /// Fallback reconnection match when the client sent no teacher id
    async fn find_active_by_teacher_language(
        &self,
        language: &LanguageTag,
    ) -> StorageResult<Option<SessionRecord>>;

    async fn touch_activity(&self, id: &SessionId, at: DateTime<Utc>) -> StorageResult<()>;

    async fn set_class_code(&self, id: &SessionId, code: Option<String>) -> StorageResult<()>;

    async fn set_quality_reason(&self, id: &SessionId, reason: &str) -> StorageResult<()>;

    /// Increment the student count and record the student language.
    /// Resets `start_time` when this is the first student. Returns the new
    /// count.
    async fn add_student(
        &self,
        id: &SessionId,
        language: &LanguageTag,
        at: DateTime<Utc>,
    ) -> StorageResult<u32>;

    /// Decrement the student count (floor 0). Returns the new count.
    async fn remove_student(&self, id: &SessionId) -> StorageResult<u32>;

    async fn increment_translations(&self, id: &SessionId, by: u64) -> StorageResult<()>;

    async fn increment_transcripts(&self, id: &SessionId) -> StorageResult<()>;

    /// End a session: `is_active` flips false, `end_time` and quality set.
    /// Returns false (and changes nothing) if the session was already
    /// inactive; the transition happens at most once.
    async fn end_session(
        &self,
        id: &SessionId,
        quality: SessionQuality,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Reverse an end within the teacher-reconnect grace window: sets
    /// `is_active`, clears `end_time` and quality. Returns the updated row.
    async fn reactivate(&self, id: &SessionId, at: DateTime<Utc>)
        -> StorageResult<Option<SessionRecord>>;

    /// Active, never had students, started before `cutoff`
    async fn empty_teacher_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionId>>;

    /// Active, students gone (grace marker set), idle since `cutoff`
    async fn abandoned_candidates(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<SessionId>>;

    /// Active, no activity since `cutoff` (or never active and started
    /// before it)
    async fn stale_candidates(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<SessionId>>;

    /// All currently active sessions (startup code restore)
    async fn active_sessions(&self) -> StorageResult<Vec<SessionRecord>>;

    /// Most recently started sessions, newest first (analytics)
    async fn recent_sessions(&self, limit: usize) -> StorageResult<Vec<SessionRecord>>;
}
