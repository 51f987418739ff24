//! Connection registry
//!
//! One table for every live connection and all of its attributes, behind a
//! single mutex. Writes are serialized; reads hand out snapshots so no
//! caller ever iterates (or does I/O) under the lock. Critical sections
//! are O(1) per operation apart from the per-session scans, which copy.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use classbridge_core::{ClientSettings, ConnectionId, LanguageTag, Outbound, Role, SessionId};

/// Result of a role set attempt. The role is immutable after the first
/// non-unset assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleOutcome {
    Set,
    /// Already this role; harmless re-register
    Unchanged,
    /// Locked to a different role
    Locked(Role),
    UnknownConnection,
}

struct ConnectionEntry {
    session_id: SessionId,
    role: Role,
    language: LanguageTag,
    settings: ClientSettings,
    classroom_code: Option<String>,
    name: Option<String>,
    is_alive: bool,
    student_counted: bool,
    two_way: bool,
    last_interim: Option<Instant>,
    last_audio_activity_write: Option<Instant>,
    /// Insertion order, for stable per-session listings
    seq: u64,
    sink: Arc<dyn Outbound>,
}

/// Read-only copy of one connection's state.
#[derive(Clone)]
pub struct ConnectionSnapshot {
    pub connection_id: ConnectionId,
    pub session_id: SessionId,
    pub role: Role,
    pub language: LanguageTag,
    pub settings: ClientSettings,
    pub classroom_code: Option<String>,
    pub name: Option<String>,
    pub is_alive: bool,
    pub student_counted: bool,
    pub two_way: bool,
    pub sink: Arc<dyn Outbound>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    next_seq: u64,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
        sink: Arc<dyn Outbound>,
        classroom_code: Option<String>,
        two_way: bool,
    ) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.connections.insert(
            connection_id,
            ConnectionEntry {
                session_id,
                role: Role::Unset,
                language: LanguageTag::empty(),
                settings: ClientSettings::default(),
                classroom_code,
                name: None,
                is_alive: true,
                student_counted: false,
                two_way,
                last_interim: None,
                last_audio_activity_write: None,
                seq,
                sink,
            },
        );
    }

    /// Remove a connection, returning its final state.
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<ConnectionSnapshot> {
        let mut inner = self.inner.lock();
        inner
            .connections
            .remove(connection_id)
            .map(|e| snapshot(connection_id.clone(), &e))
    }

    pub fn snapshot(&self, connection_id: &ConnectionId) -> Option<ConnectionSnapshot> {
        let inner = self.inner.lock();
        inner
            .connections
            .get(connection_id)
            .map(|e| snapshot(connection_id.clone(), e))
    }

    pub fn set_role(&self, connection_id: &ConnectionId, role: Role) -> RoleOutcome {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(connection_id) {
            None => RoleOutcome::UnknownConnection,
            Some(entry) => {
                if entry.role == role {
                    RoleOutcome::Unchanged
                } else if entry.role.is_set() {
                    RoleOutcome::Locked(entry.role)
                } else {
                    entry.role = role;
                    RoleOutcome::Set
                }
            }
        }
    }

    pub fn set_language(&self, connection_id: &ConnectionId, language: LanguageTag) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.connections.get_mut(connection_id) {
            entry.language = language;
        }
    }

    /// Merge settings onto the stored ones; returns the merged result.
    pub fn merge_settings(
        &self,
        connection_id: &ConnectionId,
        incoming: &ClientSettings,
    ) -> Option<ClientSettings> {
        let mut inner = self.inner.lock();
        inner.connections.get_mut(connection_id).map(|entry| {
            entry.settings.merge(incoming);
            entry.settings.clone()
        })
    }

    pub fn set_classroom_code(&self, connection_id: &ConnectionId, code: Option<String>) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.connections.get_mut(connection_id) {
            entry.classroom_code = code;
        }
    }

    pub fn set_name(&self, connection_id: &ConnectionId, name: Option<String>) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.connections.get_mut(connection_id) {
            entry.name = name;
        }
    }

    /// Reassign a connection to another session (teacher reconnect
    /// migration, student classroom join). Other attributes are kept.
    pub fn update_session_id(&self, connection_id: &ConnectionId, session_id: SessionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(connection_id) {
            Some(entry) => {
                entry.session_id = session_id;
                true
            }
            None => false,
        }
    }

    /// Flip the student-counted flag; true only the first time.
    pub fn mark_student_counted(&self, connection_id: &ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(connection_id) {
            Some(entry) if !entry.student_counted => {
                entry.student_counted = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_alive(&self, connection_id: &ConnectionId, alive: bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.connections.get_mut(connection_id) {
            entry.is_alive = alive;
        }
    }

    pub fn set_two_way(&self, connection_id: &ConnectionId, enabled: bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.connections.get_mut(connection_id) {
            entry.two_way = enabled;
        }
    }

    /// Interim-transcription throttle: true when at least `min_interval`
    /// has passed since the last accepted interim (stamp updated then).
    pub fn allow_interim(&self, connection_id: &ConnectionId, min_interval: Duration) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(connection_id) {
            Some(entry) => {
                let allowed = entry
                    .last_interim
                    .map(|at| at.elapsed() >= min_interval)
                    .unwrap_or(true);
                if allowed {
                    entry.last_interim = Some(Instant::now());
                }
                allowed
            }
            None => false,
        }
    }

    /// Audio activity-write throttle (min interval between DB writes).
    pub fn allow_audio_activity_write(
        &self,
        connection_id: &ConnectionId,
        min_interval: Duration,
    ) -> bool {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(connection_id) {
            Some(entry) => {
                let allowed = entry
                    .last_audio_activity_write
                    .map(|at| at.elapsed() >= min_interval)
                    .unwrap_or(true);
                if allowed {
                    entry.last_audio_activity_write = Some(Instant::now());
                }
                allowed
            }
            None => false,
        }
    }

    /// Student connections of a session in join order, plus the set of
    /// distinct non-empty student languages.
    pub fn students_for_session(
        &self,
        session_id: &SessionId,
    ) -> (Vec<ConnectionSnapshot>, Vec<LanguageTag>) {
        let inner = self.inner.lock();
        let mut students: Vec<(&ConnectionId, &ConnectionEntry)> = inner
            .connections
            .iter()
            .filter(|(_, e)| e.session_id == *session_id && e.role == Role::Student)
            .collect();
        students.sort_by_key(|(_, e)| e.seq);

        let mut languages: Vec<LanguageTag> = Vec::new();
        let snapshots = students
            .into_iter()
            .map(|(id, e)| {
                if !e.language.is_empty() && !languages.contains(&e.language) {
                    languages.push(e.language.clone());
                }
                snapshot(id.clone(), e)
            })
            .collect();
        (snapshots, languages)
    }

    pub fn teachers_for_session(&self, session_id: &SessionId) -> Vec<ConnectionSnapshot> {
        let inner = self.inner.lock();
        let mut teachers: Vec<(&ConnectionId, &ConnectionEntry)> = inner
            .connections
            .iter()
            .filter(|(_, e)| e.session_id == *session_id && e.role == Role::Teacher)
            .collect();
        teachers.sort_by_key(|(_, e)| e.seq);
        teachers
            .into_iter()
            .map(|(id, e)| snapshot(id.clone(), e))
            .collect()
    }

    pub fn all(&self) -> Vec<ConnectionSnapshot> {
        let inner = self.inner.lock();
        inner
            .connections
            .iter()
            .map(|(id, e)| snapshot(id.clone(), e))
            .collect()
    }

    pub fn teacher_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .connections
            .values()
            .filter(|e| e.role == Role::Teacher)
            .count()
    }

    pub fn student_count(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .connections
            .values()
            .filter(|e| e.role == Role::Student)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn snapshot(connection_id: ConnectionId, entry: &ConnectionEntry) -> ConnectionSnapshot {
    ConnectionSnapshot {
        connection_id,
        session_id: entry.session_id.clone(),
        role: entry.role,
        language: entry.language.clone(),
        settings: entry.settings.clone(),
        classroom_code: entry.classroom_code.clone(),
        name: entry.name.clone(),
        is_alive: entry.is_alive,
        student_counted: entry.student_counted,
        two_way: entry.two_way,
        sink: entry.sink.clone(),
    }
}
