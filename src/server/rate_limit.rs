//! Minimum spacing between search requests.
//!
//! The catalog bots throttle and eventually ban nicknames that search too
//! often, so searches are gated before they reach the channel. The gate is
//! keyed per session or shared by the whole hub.

use crate::config::RateLimitScope;
use crate::server::session::SessionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("search rate limited, retry in {retry_after:?}")]
pub struct RateLimited {
    pub retry_after: Duration,
}

impl RateLimited {
    /// Whole seconds to wait, rounded up.
    pub fn retry_after_seconds(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// A search let through by [`SearchLimiter::check`]. Hand it to
/// [`SearchLimiter::refund`] if the search never reached the channel.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    key: Option<SessionId>,
    at: Instant,
    previous: Option<Instant>,
}

pub struct SearchLimiter {
    interval: Duration,
    scope: RateLimitScope,
    last_search: Mutex<HashMap<Option<SessionId>, Instant>>,
}

impl SearchLimiter {
    pub fn new(interval: Duration, scope: RateLimitScope) -> Self {
        Self {
            interval,
            scope,
            last_search: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a search from `session` now, or say how long to wait.
    pub fn check(&self, session: SessionId) -> Result<Admission, RateLimited> {
        self.check_at(session, Instant::now())
    }

    /// Test-and-set under one lock: an admitted search records `now` before
    /// any other request can look at the timestamp.
    pub fn check_at(&self, session: SessionId, now: Instant) -> Result<Admission, RateLimited> {
        let key = self.key(session);
        let mut last_search = self.last_search.lock();
        if let Some(last) = last_search.get(&key) {
            let next = *last + self.interval;
            if now < next {
                return Err(RateLimited {
                    retry_after: next - now,
                });
            }
        }
        let previous = last_search.insert(key, now);
        Ok(Admission {
            key,
            at: now,
            previous,
        })
    }

    /// Undo an admission whose search was never sent. Nothing changes if a
    /// later search has been admitted on the same key since.
    pub fn refund(&self, admission: Admission) {
        let mut last_search = self.last_search.lock();
        if last_search.get(&admission.key) != Some(&admission.at) {
            return;
        }
        match admission.previous {
            Some(previous) => {
                last_search.insert(admission.key, previous);
            }
            None => {
                last_search.remove(&admission.key);
            }
        }
    }

    /// Drop the timestamp of a session that went away.
    pub fn forget(&self, session: SessionId) {
        if self.scope == RateLimitScope::Session {
            self.last_search.lock().remove(&Some(session));
        }
    }

    fn key(&self, session: SessionId) -> Option<SessionId> {
        match self.scope {
            RateLimitScope::Session => Some(session),
            RateLimitScope::Hub => None,
        }
    }
}
