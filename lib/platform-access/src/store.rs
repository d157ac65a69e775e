//! Keyed storage for server-side sessions.
//!
//! Each session lives behind its own async mutex. Holding that lock for a
//! whole gate run means two requests carrying the same callback code are
//! serialized, and the second one sees the first one's recorded outcome.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gist_analytics_core::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::session::Session;

/// A session shared between concurrent requests.
pub type SharedSession = Arc<Mutex<Session>>;

/// Storage for sessions keyed by browser-bound ID.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the live session for `id`, or creates a new empty one.
    ///
    /// The returned ID differs from `id` when a new session was created.
    async fn load_or_create(&self, id: Option<SessionId>) -> (SessionId, SharedSession);

    /// Returns the live session for `id`, if any.
    async fn get(&self, id: SessionId) -> Option<SharedSession>;

    /// Moves `session` to a freshly minted ID and forgets its old one.
    ///
    /// The caller holds the session's lock. Returns `None` if the session
    /// is no longer stored.
    async fn rotate(&self, session: &mut Session) -> Option<SessionId>;

    /// Destroys a session. Returns true if it existed.
    async fn remove(&self, id: SessionId) -> bool;

    /// Drops sessions idle for longer than the TTL. Returns how many.
    async fn sweep_expired(&self) -> usize;
}

struct Entry {
    session: SharedSession,
    last_seen: DateTime<Utc>,
}

/// An in-process session store with an idle TTL.
///
/// Contents are lost on restart.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Entry>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    /// Creates a store whose sessions expire after `ttl` without use.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the idle TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the number of stored sessions, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns true if no sessions are stored.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        now - entry.last_seen >= self.ttl
    }

    /// Looks up a live entry and refreshes its last-seen time.
    fn touch(
        &self,
        sessions: &mut HashMap<SessionId, Entry>,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> Option<SharedSession> {
        let entry = sessions.get(&id)?;
        if self.is_expired(entry, now) {
            sessions.remove(&id);
            debug!(session_id = %id, "session expired");
            return None;
        }
        let entry = sessions.get_mut(&id)?;
        entry.last_seen = now;
        Some(Arc::clone(&entry.session))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_or_create(&self, id: Option<SessionId>) -> (SessionId, SharedSession) {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        if let Some(id) = id
            && let Some(session) = self.touch(&mut sessions, id, now)
        {
            return (id, session);
        }

        let id = SessionId::new();
        let session = Arc::new(Mutex::new(Session::new(id, now)));
        sessions.insert(
            id,
            Entry {
                session: Arc::clone(&session),
                last_seen: now,
            },
        );
        debug!(session_id = %id, "session created");
        (id, session)
    }

    async fn get(&self, id: SessionId) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        self.touch(&mut sessions, id, Utc::now())
    }

    async fn rotate(&self, session: &mut Session) -> Option<SessionId> {
        let old = *session.id();
        let mut sessions = self.sessions.write().await;
        let entry = sessions.remove(&old)?;

        let id = SessionId::new();
        session.rekey(id);
        sessions.insert(
            id,
            Entry {
                session: entry.session,
                last_seen: Utc::now(),
            },
        );
        debug!(session_id = %id, "session rotated");
        Some(id)
    }

    async fn remove(&self, id: SessionId) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        before - sessions.len()
    }
}
