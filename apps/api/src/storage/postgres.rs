use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::SessionStore;
use crate::evaluation::session::EvaluationSession;

/// Upserts sessions into `evaluation_sessions`.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run evaluation_sessions migrations")
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn persist(&self, session: &EvaluationSession) -> Result<()> {
        let document = serde_json::to_value(session).context("Failed to serialize session")?;
        let failure = session
            .failure
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("Failed to serialize session failure")?;
        let (score, qualification) = match &session.final_evaluation {
            Some(evaluation) => (
                Some(i16::from(evaluation.overall_score)),
                Some(evaluation.qualification_tag.as_str()),
            ),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO evaluation_sessions
                (id, batch_id, position, filename, state, overall_score, qualification,
                 failure, session, created_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                overall_score = EXCLUDED.overall_score,
                qualification = EXCLUDED.qualification,
                failure = EXCLUDED.failure,
                session = EXCLUDED.session,
                finished_at = EXCLUDED.finished_at,
                updated_at = NOW()
            "#,
        )
        .bind(session.id)
        .bind(session.batch_id)
        .bind(i32::try_from(session.position).unwrap_or(i32::MAX))
        .bind(&session.filename)
        .bind(session.state.as_str())
        .bind(score)
        .bind(qualification)
        .bind(failure)
        .bind(document)
        .bind(session.created_at)
        .bind(session.finished_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to persist session {}", session.id))?;

        debug!(session_id = %session.id, state = session.state.as_str(), "Session persisted");
        Ok(())
    }

    async fn batch_sessions(&self, batch_id: Uuid) -> Result<Vec<EvaluationSession>> {
        let documents: Vec<Value> = sqlx::query_scalar(
            r#"
            SELECT session FROM evaluation_sessions
            WHERE batch_id = $1
            ORDER BY position, created_at
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load sessions of batch {batch_id}"))?;
        decode_sessions(documents)
    }

    async fn recent_sessions(&self, limit: usize) -> Result<Vec<EvaluationSession>> {
        let documents: Vec<Value> = sqlx::query_scalar(
            r#"
            SELECT session FROM evaluation_sessions
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent sessions")?;
        decode_sessions(documents)
    }
}

fn decode_sessions(documents: Vec<Value>) -> Result<Vec<EvaluationSession>> {
    documents
        .into_iter()
        .map(|document| serde_json::from_value(document).context("Failed to decode stored session"))
        .collect()
}
