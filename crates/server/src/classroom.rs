//! Classroom code directory
//!
//! Issues and validates the 6-character codes teachers share with their
//! class. One live code per session, code-to-session injective, expired
//! entries removed by a background sweep.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use classbridge_core::SessionId;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 6;
const MAX_GENERATION_ATTEMPTS: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DirectoryError {
    /// Could not draw an unused code within the attempt budget
    #[error("classroom code space exhausted after {0} attempts")]
    CodeExhaustion(usize),

    /// restore_code would steal a live code from another session
    #[error("code {code} already maps to a different session")]
    CodeConflict { code: String },
}

#[derive(Debug, Clone)]
pub struct CodeEntry {
    pub code: String,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct DirectoryInner {
    by_code: HashMap<String, CodeEntry>,
    by_session: HashMap<SessionId, String>,
}

pub struct ClassroomCodeDirectory {
    inner: Mutex<DirectoryInner>,
    expiration: ChronoDuration,
}

impl ClassroomCodeDirectory {
    pub fn new(expiration: Duration) -> Self {
        Self {
            inner: Mutex::new(DirectoryInner::default()),
            expiration: ChronoDuration::milliseconds(expiration.as_millis() as i64),
        }
    }

    /// Issue a fresh code for a session, replacing any previous one.
    pub fn generate_code(&self, session_id: &SessionId) -> Result<CodeEntry, DirectoryError> {
        let mut inner = self.inner.lock();

        // Drop the session's previous code so the 1:1 mapping holds
        if let Some(old) = inner.by_session.remove(session_id) {
            inner.by_code.remove(&old);
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let code: String = (0..CODE_LENGTH)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if inner.by_code.contains_key(&code) {
                continue;
            }
            let now = Utc::now();
            let entry = CodeEntry {
                code: code.clone(),
                session_id: session_id.clone(),
                created_at: now,
                expires_at: now + self.expiration,
            };
            inner.by_code.insert(code.clone(), entry.clone());
            inner.by_session.insert(session_id.clone(), code);
            return Ok(entry);
        }

        Err(DirectoryError::CodeExhaustion(MAX_GENERATION_ATTEMPTS))
    }

    /// Idempotently install a code loaded from persistence.
    ///
    /// Repeated calls with the same pair are no-ops; installing a code
    /// that is live for a different session is refused.
    pub fn restore_code(
        &self,
        code: &str,
        session_id: &SessionId,
    ) -> Result<CodeEntry, DirectoryError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.by_code.get(code) {
            if existing.session_id == *session_id {
                return Ok(existing.clone());
            }
            return Err(DirectoryError::CodeConflict {
                code: code.to_string(),
            });
        }

        // The session may hold a different (freshly generated) code; the
        // persisted one wins.
        if let Some(old) = inner.by_session.remove(session_id) {
            inner.by_code.remove(&old);
        }

        let now = Utc::now();
        let entry = CodeEntry {
            code: code.to_string(),
            session_id: session_id.clone(),
            created_at: now,
            expires_at: now + self.expiration,
        };
        inner.by_code.insert(code.to_string(), entry.clone());
        inner.by_session.insert(session_id.clone(), code.to_string());
        Ok(entry)
    }

    pub fn is_valid(&self, code: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .by_code
            .get(code)
            .map(|e| e.expires_at > Utc::now())
            .unwrap_or(false)
    }

    pub fn session_for_code(&self, code: &str) -> Option<SessionId> {
        let inner = self.inner.lock();
        inner
            .by_code
            .get(code)
            .filter(|e| e.expires_at > Utc::now())
            .map(|e| e.session_id.clone())
    }

    pub fn code_for_session(&self, session_id: &SessionId) -> Option<CodeEntry> {
        let inner = self.inner.lock();
        inner
            .by_session
            .get(session_id)
            .and_then(|code| inner.by_code.get(code))
            .cloned()
    }

    pub fn clear_for_session(&self, session_id: &SessionId) {
        let mut inner = self.inner.lock();
        if let Some(code) = inner.by_session.remove(session_id) {
            inner.by_code.remove(&code);
        }
    }

    /// Remove entries past their expiry. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let expired: Vec<(String, SessionId)> = inner
            .by_code
            .values()
            .filter(|e| e.expires_at <= now)
            .map(|e| (e.code.clone(), e.session_id.clone()))
            .collect();
        for (code, session) in &expired {
            inner.by_code.remove(code);
            inner.by_session.remove(session);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ClassroomCodeDirectory {
        ClassroomCodeDirectory::new(Duration::from_secs(3600))
    }

    #[test]
    fn test_code_shape() {
        let dir = directory();
        let entry = dir.generate_code(&"s1".into()).unwrap();
        assert_eq!(entry.code.len(), 6);
        assert!(entry
            .code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        assert!(entry.expires_at > entry.created_at);
    }

    #[test]
    fn test_one_live_code_per_session() {
        let dir = directory();
        let first = dir.generate_code(&"s1".into()).unwrap();
        let second = dir.generate_code(&"s1".into()).unwrap();

        assert!(!dir.is_valid(&first.code) || first.code == second.code);
        assert!(dir.is_valid(&second.code));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_restore_is_idempotent() {
        let dir = directory();
        let a = dir.restore_code("AB12CD", &"s1".into()).unwrap();
        let b = dir.restore_code("AB12CD", &"s1".into()).unwrap();
        assert_eq!(a.code, b.code);
        assert_eq!(dir.session_for_code("AB12CD"), Some("s1".into()));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_restore_refuses_live_conflict() {
        let dir = directory();
        dir.restore_code("AB12CD", &"s1".into()).unwrap();
        let err = dir.restore_code("AB12CD", &"s2".into()).unwrap_err();
        assert!(matches!(err, DirectoryError::CodeConflict { .. }));
    }

    #[test]
    fn test_restore_replaces_generated_code() {
        let dir = directory();
        let generated = dir.generate_code(&"s1".into()).unwrap();
        dir.restore_code("XY99ZZ", &"s1".into()).unwrap();

        // Persisted code wins; the generated one is gone
        assert!(dir.is_valid("XY99ZZ"));
        if generated.code != "XY99ZZ" {
            assert!(!dir.is_valid(&generated.code));
        }
        assert_eq!(dir.code_for_session(&"s1".into()).unwrap().code, "XY99ZZ");
    }

    #[test]
    fn test_clear_for_session() {
        let dir = directory();
        let entry = dir.generate_code(&"s1".into()).unwrap();
        dir.clear_for_session(&"s1".into());
        assert!(!dir.is_valid(&entry.code));
        assert!(dir.code_for_session(&"s1".into()).is_none());
    }

    #[test]
    fn test_sweep_removes_expired() {
        let dir = ClassroomCodeDirectory::new(Duration::from_millis(0));
        dir.generate_code(&"s1".into()).unwrap();
        // Zero expiration: entry is born expired
        assert_eq!(dir.sweep_expired(), 1);
        assert!(dir.is_empty());
    }
}
