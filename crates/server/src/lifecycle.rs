//! Session lifecycle management
//!
//! Three reaper strategies run in a fixed order on a timer; each is a pure
//! candidate query followed by transactional ends, so a session ended by
//! an earlier strategy is invisible to the later ones. Also owns the
//! analytics classifier and the teacher-reconnect reactivation.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use classbridge_config::TimeoutConfig;
use classbridge_core::SessionId;
use classbridge_storage::{SessionQuality, SessionRecord, SessionStore};

use crate::classroom::ClassroomCodeDirectory;
use crate::metrics;

/// Grace-period marker written when the student count reaches zero. Its
/// presence hands the session from the EmptyTeacher reaper to Abandoned.
pub const ALL_STUDENTS_LEFT_REASON: &str = "all students disconnected, awaiting reconnection";

const MIN_REAL_DURATION_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaperReport {
    pub empty_teacher: usize,
    pub abandoned: usize,
    pub inactive: usize,
}

impl ReaperReport {
    pub fn total(&self) -> usize {
        self.empty_teacher + self.abandoned + self.inactive
    }
}

/// Analytics classification of a session (separate from reaping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_real: bool,
    pub reason: SessionQuality,
}

/// Classify a session. Predicates are checked in the order duration,
/// students, activity; the first failure names the reason.
pub fn classify(record: &SessionRecord, now: DateTime<Utc>) -> Classification {
    if record.duration_secs(now) < MIN_REAL_DURATION_SECS {
        return Classification {
            is_real: false,
            reason: SessionQuality::TooShort,
        };
    }
    if record.students_count == 0 {
        return Classification {
            is_real: false,
            reason: SessionQuality::NoStudents,
        };
    }
    if record.total_translations == 0 && record.transcript_count == 0 {
        return Classification {
            is_real: false,
            reason: SessionQuality::NoActivity,
        };
    }
    Classification {
        is_real: true,
        reason: SessionQuality::Real,
    }
}

pub struct SessionLifecycleManager {
    sessions: Arc<dyn SessionStore>,
    codes: Arc<ClassroomCodeDirectory>,
    timeouts: TimeoutConfig,
}

impl SessionLifecycleManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        codes: Arc<ClassroomCodeDirectory>,
        timeouts: TimeoutConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            codes,
            timeouts,
        })
    }

    /// One pass of all three strategies, in order.
    pub async fn run_reapers(&self, now: DateTime<Utc>) -> ReaperReport {
        let mut report = ReaperReport::default();

        let cutoff = now - to_chrono(self.timeouts.empty_teacher_timeout_ms);
        match self.sessions.empty_teacher_candidates(cutoff).await {
            Ok(candidates) => {
                report.empty_teacher = self
                    .end_all(&candidates, SessionQuality::NoStudents, "no students joined", now)
                    .await;
            }
            Err(e) => tracing::warn!(error = %e, "EmptyTeacher candidate query failed"),
        }

        let cutoff = now - to_chrono(self.timeouts.all_students_left_timeout_ms);
        match self.sessions.abandoned_candidates(cutoff).await {
            Ok(candidates) => {
                report.abandoned = self
                    .end_all(
                        &candidates,
                        SessionQuality::NoActivity,
                        "students left and did not return",
                        now,
                    )
                    .await;
            }
            Err(e) => tracing::warn!(error = %e, "Abandoned candidate query failed"),
        }

        let cutoff = now - to_chrono(self.timeouts.stale_session_timeout_ms);
        match self.sessions.stale_candidates(cutoff).await {
            Ok(candidates) => {
                report.inactive = self
                    .end_all(&candidates, SessionQuality::NoActivity, "no recent activity", now)
                    .await;
            }
            Err(e) => tracing::warn!(error = %e, "Inactive candidate query failed"),
        }

        if report.total() > 0 {
            tracing::info!(
                empty_teacher = report.empty_teacher,
                abandoned = report.abandoned,
                inactive = report.inactive,
                "Reaper pass ended sessions"
            );
        }
        report
    }

    async fn end_all(
        &self,
        candidates: &[SessionId],
        quality: SessionQuality,
        reason: &str,
        now: DateTime<Utc>,
    ) -> usize {
        let mut ended = 0;
        for id in candidates {
            match self
                .sessions
                .end_session(id, quality, Some(reason.to_string()), now)
                .await
            {
                Ok(true) => {
                    self.codes.clear_for_session(id);
                    metrics::record_session_ended(quality.as_str());
                    tracing::info!(session_id = %id, quality = quality.as_str(), "Ended session");
                    ended += 1;
                }
                // Already inactive: an earlier strategy (or a handler) got
                // there first
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Failed to end session");
                }
            }
        }
        ended
    }

    /// Resume a recently ended session for a returning teacher.
    ///
    /// Succeeds when the stored row ended within the reconnection grace
    /// window; the persisted classroom code (if any) is restored into the
    /// directory.
    pub async fn try_reactivate(
        &self,
        teacher_id: &str,
        now: DateTime<Utc>,
    ) -> Option<SessionRecord> {
        let record = match self.sessions.find_recent_inactive_by_teacher(teacher_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(teacher_id, error = %e, "Reconnect lookup failed");
                return None;
            }
        };

        let grace = to_chrono(self.timeouts.teacher_reconnection_grace_ms);
        let reference = record.last_activity_at.or(record.end_time)?;
        if now - reference > grace {
            tracing::debug!(
                teacher_id,
                session_id = %record.session_id,
                "Previous session outside reconnection grace"
            );
            return None;
        }

        match self.sessions.reactivate(&record.session_id, now).await {
            Ok(Some(reactivated)) => {
                if let Some(code) = &reactivated.class_code {
                    if let Err(e) = self.codes.restore_code(code, &reactivated.session_id) {
                        tracing::warn!(
                            session_id = %reactivated.session_id,
                            code,
                            error = %e,
                            "Could not restore classroom code"
                        );
                    }
                }
                tracing::info!(
                    teacher_id,
                    session_id = %reactivated.session_id,
                    "Reactivated session within grace period"
                );
                Some(reactivated)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(teacher_id, error = %e, "Reactivation failed");
                None
            }
        }
    }

    /// Classify the most recently started sessions (analytics snapshot,
    /// logged at startup).
    pub async fn classify_recent(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<(SessionRecord, Classification)> {
        match self.sessions.recent_sessions(limit).await {
            Ok(records) => records
                .into_iter()
                .map(|record| {
                    let classification = classify(&record, now);
                    (record, classification)
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Recent-session query failed");
                Vec::new()
            }
        }
    }

    /// Background reaper loop. Returns the shutdown sender.
    pub fn start_loop(self: Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = self;
        let interval = manager.timeouts.cleanup_interval();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        manager.run_reapers(Utc::now()).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Session reaper loop shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

fn to_chrono(ms: u64) -> ChronoDuration {
    ChronoDuration::milliseconds(ms as i64)
}
