//! Storage collaborator: receives every session once it reaches a terminal state
//! and serves them back after the in-memory batch record is gone.

mod postgres;

pub use postgres::PgSessionStore;

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::evaluation::session::EvaluationSession;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores the session. Calling it again with the same session id overwrites.
    async fn persist(&self, session: &EvaluationSession) -> Result<()>;

    /// Sessions of one batch in document order. Empty when the batch is unknown.
    async fn batch_sessions(&self, batch_id: Uuid) -> Result<Vec<EvaluationSession>>;

    /// Up to `limit` sessions, most recently created first.
    async fn recent_sessions(&self, limit: usize) -> Result<Vec<EvaluationSession>>;
}

/// Keeps terminal sessions in process memory. Used when no database is configured.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, EvaluationSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, id: Uuid) -> Option<EvaluationSession> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn persist(&self, session: &EvaluationSession) -> Result<()> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn batch_sessions(&self, batch_id: Uuid) -> Result<Vec<EvaluationSession>> {
        let mut sessions: Vec<EvaluationSession> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.batch_id == batch_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.position, s.created_at));
        Ok(sessions)
    }

    async fn recent_sessions(&self, limit: usize) -> Result<Vec<EvaluationSession>> {
        let mut sessions: Vec<EvaluationSession> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        Ok(sessions)
    }
}
