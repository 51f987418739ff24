//! Per-connection rate limiting
//!
//! Sliding-window counter used by the two-way student_request path.
//! State lives with the component that owns the limit, keyed by
//! connection; windows are short so the map stays small.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

use classbridge_core::ConnectionId;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded: {allowed} per {window_ms} ms")]
    Exceeded { allowed: u32, window_ms: u64 },
}

/// Sliding-window limiter over event timestamps.
pub struct RateLimiter {
    allowed: u32,
    window: Duration,
    events: Mutex<HashMap<ConnectionId, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(allowed: u32, window: Duration) -> Self {
        Self {
            allowed: allowed.max(1),
            window,
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Record one event for the connection; errors when the window is
    /// already full.
    pub fn check(&self, connection_id: &ConnectionId) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut events = self.events.lock();
        let stamps = events.entry(connection_id.clone()).or_default();
        stamps.retain(|at| now.duration_since(*at) < self.window);

        if stamps.len() as u32 >= self.allowed {
            return Err(RateLimitError::Exceeded {
                allowed: self.allowed,
                window_ms: self.window.as_millis() as u64,
            });
        }
        stamps.push(now);
        Ok(())
    }

    /// Forget a connection (close teardown).
    pub fn forget(&self, connection_id: &ConnectionId) {
        self.events.lock().remove(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(2));
        let conn = ConnectionId::generate();

        for _ in 0..3 {
            assert!(limiter.check(&conn).is_ok());
        }
        assert!(limiter.check(&conn).is_err());
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(1));
        let conn = ConnectionId::generate();
        assert!(limiter.check(&conn).is_ok());
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.check(&conn).is_ok());
    }

    #[test]
    fn test_connections_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(2));
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert!(limiter.check(&a).is_ok());
        assert!(limiter.check(&b).is_ok());
        assert!(limiter.check(&a).is_err());

        limiter.forget(&a);
        assert!(limiter.check(&a).is_ok());
    }
}
