//! Registry of connected clients.

use crate::server::rate_limit::SearchLimiter;
use crate::server::session::{ClientSession, SessionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct SessionHub {
    sessions: Mutex<HashMap<SessionId, Arc<ClientSession>>>,
    live: AtomicUsize,
    limiter: SearchLimiter,
}

impl SessionHub {
    pub fn new(limiter: SearchLimiter) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            live: AtomicUsize::new(0),
            limiter,
        }
    }

    pub fn limiter(&self) -> &SearchLimiter {
        &self.limiter
    }

    pub fn register(&self, session: Arc<ClientSession>) {
        let id = session.id();
        let previous = self.sessions.lock().insert(id, session);
        if previous.is_none() {
            self.live.fetch_add(1, Ordering::AcqRel);
        }
        tracing::info!(session = %id, live = self.live_count(), "session registered");
    }

    /// Remove a session and tear it down. Unknown ids are ignored, so
    /// concurrent teardown triggers are harmless.
    pub async fn unregister(&self, id: SessionId) {
        let Some(session) = self.sessions.lock().remove(&id) else {
            return;
        };
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.limiter.forget(id);
        session.close().await;
        tracing::info!(session = %id, live = self.live_count(), "session unregistered");
    }

    /// Tear down every session.
    pub async fn broadcast_shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().collect();
        tracing::info!(count = sessions.len(), "closing all sessions");
        for (id, session) in sessions {
            self.live.fetch_sub(1, Ordering::AcqRel);
            self.limiter.forget(id);
            session.close().await;
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}
