//! Two-way request routing
//!
//! Maps (session, request) to the student connection that asked, so a
//! private teacher reply can find its way back. Entries die with the
//! reply or with the session.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use classbridge_core::{ConnectionId, Outbound, RequestId, SessionId};

#[derive(Clone)]
pub struct RequestRoute {
    pub connection_id: ConnectionId,
    pub sink: Arc<dyn Outbound>,
}

#[derive(Default)]
pub struct RequestRouter {
    routes: Mutex<HashMap<(SessionId, RequestId), RequestRoute>>,
}

impl RequestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        session_id: SessionId,
        request_id: RequestId,
        connection_id: ConnectionId,
        sink: Arc<dyn Outbound>,
    ) {
        self.routes.lock().insert(
            (session_id, request_id),
            RequestRoute {
                connection_id,
                sink,
            },
        );
    }

    /// Take the route for a reply; the entry expires with this call.
    pub fn take(&self, session_id: &SessionId, request_id: &RequestId) -> Option<RequestRoute> {
        self.routes
            .lock()
            .remove(&(session_id.clone(), request_id.clone()))
    }

    /// Drop every route of a session (session end).
    pub fn clear_session(&self, session_id: &SessionId) {
        self.routes
            .lock()
            .retain(|(sid, _), _| sid != session_id);
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use classbridge_core::SendError;

    struct NullSink;

    #[async_trait]
    impl Outbound for NullSink {
        async fn send_text(&self, _payload: String) -> Result<(), SendError> {
            Ok(())
        }

        async fn send_ping(&self) -> Result<(), SendError> {
            Ok(())
        }

        async fn close(&self, _code: u16, _reason: &str) {}

        async fn terminate(&self) {}
    }

    #[test]
    fn test_take_expires_route() {
        let router = RequestRouter::new();
        let conn = ConnectionId::generate();
        router.register(
            "s1".into(),
            "r1".into(),
            conn.clone(),
            Arc::new(NullSink),
        );

        let route = router.take(&"s1".into(), &"r1".into()).unwrap();
        assert_eq!(route.connection_id, conn);
        assert!(router.take(&"s1".into(), &"r1".into()).is_none());
    }

    #[test]
    fn test_clear_session() {
        let router = RequestRouter::new();
        router.register("s1".into(), "r1".into(), ConnectionId::generate(), Arc::new(NullSink));
        router.register("s1".into(), "r2".into(), ConnectionId::generate(), Arc::new(NullSink));
        router.register("s2".into(), "r3".into(), ConnectionId::generate(), Arc::new(NullSink));

        router.clear_session(&"s1".into());
        assert_eq!(router.len(), 1);
        assert!(router.take(&"s2".into(), &"r3".into()).is_some());
    }
}
