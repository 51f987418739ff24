//! In-memory storage backends
//!
//! Default backends for development and tests. Rows live in a HashMap
//! behind a RwLock; every mutation happens under the write lock, which
//! gives the single-row atomicity the broker assumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use classbridge_core::{LanguageTag, SessionId};

use crate::session::{SessionQuality, SessionRecord, SessionStore};
use crate::translation::{TranslationRecord, TranslationStore};
use crate::{StorageError, StorageResult};

#[derive(Default)]
pub struct InMemorySessionStore {
    rows: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_row<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut SessionRecord) -> T,
    ) -> StorageResult<T> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        Ok(f(row))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, record: SessionRecord) -> StorageResult<()> {
        self.rows.write().insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> StorageResult<Option<SessionRecord>> {
        Ok(self.rows.read().get(id).cloned())
    }

    async fn find_active_by_teacher(
        &self,
        teacher_id: &str,
    ) -> StorageResult<Option<SessionRecord>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| r.is_active && r.teacher_id.as_deref() == Some(teacher_id))
            .max_by_key(|r| r.start_time)
            .cloned())
    }

    async fn find_recent_inactive_by_teacher(
        &self,
        teacher_id: &str,
    ) -> StorageResult<Option<SessionRecord>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| !r.is_active && r.teacher_id.as_deref() == Some(teacher_id))
            .max_by_key(|r| r.end_time)
            .cloned())
    }

    async fn find_active_by_teacher_language(
        &self,
        language: &LanguageTag,
    ) -> StorageResult<Option<SessionRecord>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| r.is_active && r.teacher_language.as_ref() == Some(language))
            .max_by_key(|r| r.start_time)
            .cloned())
    }

    async fn touch_activity(&self, id: &SessionId, at: DateTime<Utc>) -> StorageResult<()> {
        self.with_row(id, |row| {
            row.last_activity_at = Some(at);
        })
    }

    async fn set_class_code(&self, id: &SessionId, code: Option<String>) -> StorageResult<()> {
        self.with_row(id, |row| {
            row.class_code = code;
        })
    }

    async fn set_quality_reason(&self, id: &SessionId, reason: &str) -> StorageResult<()> {
        self.with_row(id, |row| {
            row.quality_reason = Some(reason.to_string());
        })
    }

    async fn add_student(
        &self,
        id: &SessionId,
        language: &LanguageTag,
        at: DateTime<Utc>,
    ) -> StorageResult<u32> {
        self.with_row(id, |row| {
            if row.students_count == 0 {
                row.start_time = at;
            }
            row.students_count += 1;
            row.student_language = Some(language.clone());
            row.students_count
        })
    }

    async fn remove_student(&self, id: &SessionId) -> StorageResult<u32> {
        self.with_row(id, |row| {
            row.students_count = row.students_count.saturating_sub(1);
            row.students_count
        })
    }

    async fn increment_translations(&self, id: &SessionId, by: u64) -> StorageResult<()> {
        self.with_row(id, |row| {
            row.total_translations += by;
        })
    }

    async fn increment_transcripts(&self, id: &SessionId) -> StorageResult<()> {
        self.with_row(id, |row| {
            row.transcript_count += 1;
        })
    }

    async fn end_session(
        &self,
        id: &SessionId,
        quality: SessionQuality,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.with_row(id, |row| {
            if !row.is_active {
                return false;
            }
            row.is_active = false;
            row.end_time = Some(at);
            row.quality = quality;
            if let Some(reason) = reason {
                row.quality_reason = Some(reason);
            }
            true
        })
    }

    async fn reactivate(
        &self,
        id: &SessionId,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<SessionRecord>> {
        let mut rows = self.rows.write();
        match rows.get_mut(id) {
            Some(row) => {
                row.is_active = true;
                row.end_time = None;
                row.quality = SessionQuality::Unknown;
                row.last_activity_at = Some(at);
                Ok(Some(row.clone()))
            }
            None => Ok(None),
        }
    }

    async fn empty_teacher_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<SessionId>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| {
                r.is_active
                    && r.students_count == 0
                    && r.quality_reason.is_none()
                    && r.start_time < cutoff
            })
            .map(|r| r.session_id.clone())
            .collect())
    }

    async fn abandoned_candidates(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<SessionId>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| {
                r.is_active
                    && r.students_count == 0
                    && r.quality_reason.is_some()
                    && matches!(r.last_activity_at, Some(at) if at < cutoff)
            })
            .map(|r| r.session_id.clone())
            .collect())
    }

    async fn stale_candidates(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<SessionId>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| {
                r.is_active
                    && match r.last_activity_at {
                        Some(at) => at < cutoff,
                        None => r.start_time < cutoff,
                    }
            })
            .map(|r| r.session_id.clone())
            .collect())
    }

    async fn active_sessions(&self) -> StorageResult<Vec<SessionRecord>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn recent_sessions(&self, limit: usize) -> StorageResult<Vec<SessionRecord>> {
        let mut rows: Vec<SessionRecord> = self.rows.read().values().cloned().collect();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryTranslationStore {
    rows: RwLock<Vec<TranslationRecord>>,
}

impl InMemoryTranslationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far (test helper)
    pub fn all(&self) -> Vec<TranslationRecord> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl TranslationStore for InMemoryTranslationStore {
    async fn record(&self, record: TranslationRecord) -> StorageResult<()> {
        self.rows.write().push(record);
        Ok(())
    }

    async fn count_for_session(&self, id: &SessionId) -> StorageResult<u64> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| &r.session_id == id)
            .count() as u64)
    }

    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}
