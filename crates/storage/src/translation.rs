//! Delivered-translation records
//!
//! A row is appended only after a send to the student succeeded; the
//! pipeline enforces that ordering, this crate just stores what it is
//! given.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbridge_core::{LanguageTag, SessionId};

use crate::StorageResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub session_id: SessionId,
    pub source_language: LanguageTag,
    pub target_language: LanguageTag,
    pub original_text: String,
    pub translated_text: String,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait TranslationStore: Send + Sync {
    /// Append one delivered translation
    async fn record(&self, record: TranslationRecord) -> StorageResult<()>;

    /// Rows recorded for a session
    async fn count_for_session(&self, id: &SessionId) -> StorageResult<u64>;

    /// Drain pending writes; called once at shutdown
    async fn flush(&self) -> StorageResult<()>;
}
