//! Gateway-owned session store.
//!
//! Persists `Session` state keyed by session ID with a sliding TTL (spec
//! §4.1: last-writer-wins on every resume/tool-result touch, default 300s).
//! Two backends share the same [`SessionStore`] trait: a Redis-backed store
//! for real deployments and an in-memory store for tests and single-process
//! runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use redis::AsyncCommands;

use ta_domain::error::{Error, Result};
use ta_domain::session::Session;

const KEY_PREFIX: &str = "session:";

fn redis_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}{session_id}")
}

/// Session persistence with a sliding TTL. Every `put` refreshes the TTL
/// for that key, matching invariant 4 (reachable only until `ttl_seconds`
/// since `last_activity`).
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;
    async fn put(&self, session: &Session, ttl_seconds: u64) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RedisSessionStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| Error::Store(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(redis_key(session_id))
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(session)?;
        let _: () = conn
            .set_ex(redis_key(&session.id), raw, ttl_seconds)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(redis_key(session_id))
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store (tests, single-process deployments)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Entry {
    session: Session,
    expires_at: std::time::Instant,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let mut sessions = self.sessions.write();
        match sessions.get(session_id) {
            Some(entry) if entry.expires_at > std::time::Instant::now() => {
                Ok(Some(entry.session.clone()))
            }
            Some(_) => {
                sessions.remove(session_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session, ttl_seconds: u64) -> Result<()> {
        let mut sessions = self.sessions.write();
        sessions.insert(
            session.id.clone(),
            Entry {
                session: session.clone(),
                expires_at: std::time::Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ta_domain::session::ModelTier;

    fn sample_session() -> Session {
        Session::new(
            "sess-1".into(),
            "user-1".into(),
            ModelTier::Low,
            false,
            "how many rows?".into(),
            vec![],
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemorySessionStore::new();
        let session = sample_session();
        store.put(&session, 300).await.unwrap();
        let fetched = store.get("sess-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.query, session.query);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = InMemorySessionStore::new();
        let session = sample_session();
        store.put(&session, 300).await.unwrap();
        store.delete("sess-1").await.unwrap();
        assert!(store.get("sess-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_absent() {
        let store = InMemorySessionStore::new();
        let session = sample_session();
        store.put(&session, 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.get("sess-1").await.unwrap().is_none());
    }
}
