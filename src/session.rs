//! Session store
//!
//! Revocable, expiring mapping from session id to expiry time. Sits behind
//! [`SessionStore`] so the in-process map can be swapped for a networked
//! store. None of the order, ledger or withdrawal operations depend on it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a session living for `ttl`; returns its id
    async fn create(&self, ttl: Duration) -> String;

    /// True while the session exists and has not expired
    async fn is_active(&self, session_id: &str) -> bool;

    /// Forget the session. Returns false if it was unknown.
    async fn revoke(&self, session_id: &str) -> bool;

    /// Drop expired sessions; returns how many were removed
    async fn purge_expired(&self) -> usize;
}

/// Session ids to expiry, in process memory
pub struct MemorySessionStore {
    sessions: DashMap<String, DateTime<Utc>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn is_active_at(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|expires_at| *expires_at > now)
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, ttl: Duration) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(session_id.clone(), Utc::now() + ttl);
        session_id
    }

    async fn is_active(&self, session_id: &str) -> bool {
        self.is_active_at(session_id, Utc::now())
    }

    async fn revoke(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    async fn purge_expired(&self) -> usize {
        let purged = self.purge_expired_at(Utc::now());
        if purged > 0 {
            tracing::debug!(purged, "Expired sessions purged");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_revoke() {
        let store = MemorySessionStore::new();
        let id = store.create(Duration::minutes(5)).await;

        assert!(Uuid::parse_str(&id).is_ok());
        assert!(store.is_active(&id).await);
        assert!(store.revoke(&id).await);
        assert!(!store.is_active(&id).await);
        assert!(!store.revoke(&id).await);
    }

    #[tokio::test]
    async fn test_sessions_expire() {
        let store = MemorySessionStore::new();
        let short = store.create(Duration::seconds(10)).await;
        let long = store.create(Duration::hours(1)).await;

        let later = Utc::now() + Duration::minutes(1);
        assert!(!store.is_active_at(&short, later));
        assert!(store.is_active_at(&long, later));

        assert_eq!(store.purge_expired_at(later), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_inactive() {
        let store = MemorySessionStore::default();
        assert!(!store.is_active("not-a-session").await);
        assert!(store.is_empty());
    }
}
