use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::models::{Session, SessionSummary};

/// In-memory sessions, bounded by idle time and by count.
///
/// Every write first drops sessions idle for longer than `ttl`, then the
/// least recently updated ones until at most `max_sessions` remain. Reads never
/// return an expired session.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    max_sessions: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(max_sessions: usize, ttl: Duration) -> Self {
        Self { sessions: RwLock::default(), max_sessions: max_sessions.max(1), ttl }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn summary(&self, id: Uuid) -> Option<SessionSummary> {
        self.live(id, Utc::now(), |s| s.summary())
    }

    /// Bytes of the session's latest generated image. The outer `None` means
    /// the session is unknown or expired.
    pub fn generated_image(&self, id: Uuid) -> Option<Option<Bytes>> {
        self.live(id, Utc::now(), |s| s.generated.as_ref().map(|g| g.result.bytes.clone()))
    }

    pub fn update(&self, id: Uuid, apply: impl FnOnce(&mut Session)) {
        self.update_at(id, Utc::now(), apply)
    }

    fn live<T>(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        read: impl FnOnce(&Session) -> T,
    ) -> Option<T> {
        let guard = self.sessions.read();
        guard.get(&id).filter(|s| now - s.updated_at <= self.ttl).map(read)
    }

    fn update_at(&self, id: Uuid, now: DateTime<Utc>, apply: impl FnOnce(&mut Session)) {
        let mut guard = self.sessions.write();
        let before = guard.len() + usize::from(!guard.contains_key(&id));
        guard.retain(|sid, s| *sid == id || now - s.updated_at <= self.ttl);

        let session = guard.entry(id).or_insert_with(|| Session::new(id));
        apply(session);
        session.updated_at = now;

        while guard.len() > self.max_sessions {
            let oldest = guard
                .iter()
                .filter(|(sid, _)| **sid != id)
                .min_by_key(|(_, s)| s.updated_at)
                .map(|(sid, _)| *sid);
            match oldest {
                Some(sid) => guard.remove(&sid),
                None => break,
            };
        }

        let evicted = before.saturating_sub(guard.len());
        if evicted > 0 {
            info!("🧹 Evicted {} stale session(s), {} live", evicted, guard.len());
        }
    }
}
