//! Session persistence and per-session write serialization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::model::Session;

/// Key→session persistence collaborator.
///
/// [`MemorySessionStore`] is the in-process default; an external store plugs
/// in behind this trait. `insert_if_absent` carries the test-and-set
/// semantics idempotent start relies on.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &Session);

    async fn get(&self, id: &str) -> Option<Session>;

    async fn delete(&self, id: &str);

    /// Stores `session` only if nothing exists under its id yet; returns the
    /// session now present under that id.
    async fn insert_if_absent(&self, session: Session) -> Session;

    /// Scheduled sessions whose start time has passed and that have not been
    /// launched yet.
    async fn list_due_for_start(&self, now: DateTime<Utc>) -> Vec<Session>;
}

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &Session) {
        self.sessions.insert(session.id.clone(), session.clone());
    }

    async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    async fn delete(&self, id: &str) {
        self.sessions.remove(id);
    }

    async fn insert_if_absent(&self, session: Session) -> Session {
        self.sessions
            .entry(session.id.clone())
            .or_insert(session)
            .value()
            .clone()
    }

    async fn list_due_for_start(&self, now: DateTime<Utc>) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Per-session write locks.
///
/// Serializes window/manifest mutation for one session without a global lock
/// across unrelated streams.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_session(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Drops the lock entry once a session is gone.
    pub fn release(&self, id: &str) {
        self.locks.remove(id);
    }
}
