use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::evaluation::batch::{BatchRun, BatchSummary};
use crate::evaluation::credentials::CredentialSnapshot;
use crate::evaluation::session::EvaluationSession;
use crate::evaluation::statistics::ScoreStatistics;
use crate::extraction::CandidateDocument;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CandidatePayload {
    pub filename: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct EvaluationRequest {
    pub job_description: String,
    pub candidates: Vec<CandidatePayload>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationAccepted {
    pub batch_id: Uuid,
    pub total: usize,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Cancelling,
    Finished,
}

#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub progress: BatchSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<BatchRun>>,
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(default = "default_sessions_limit")]
    pub limit: usize,
}

fn default_sessions_limit() -> usize {
    50
}

const MAX_SESSIONS_LIMIT: usize = 500;

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub statistics: ScoreStatistics,
    pub sessions: Vec<EvaluationSession>,
}

#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub active: usize,
    pub credentials: Vec<CredentialSnapshot>,
}

/// POST /api/v1/evaluations
pub async fn handle_start_evaluation(
    State(state): State<AppState>,
    Json(req): Json<EvaluationRequest>,
) -> Result<(StatusCode, Json<EvaluationAccepted>), AppError> {
    if req.candidates.iter().any(|c| c.filename.trim().is_empty()) {
        return Err(AppError::Validation(
            "every candidate needs a filename".to_string(),
        ));
    }
    let documents: Vec<CandidateDocument> = req
        .candidates
        .into_iter()
        .map(|c| CandidateDocument::from_text(c.filename, c.text))
        .collect();
    let total = documents.len();

    let handle = state
        .coordinator
        .start(&state.batches, req.job_description, documents)?;
    info!(batch_id = %handle.id, candidates = total, "Evaluation batch accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(EvaluationAccepted {
            batch_id: handle.id,
            total,
        }),
    ))
}

/// GET /api/v1/evaluations/:batch_id
///
/// Batches no longer in the registry are rebuilt from the session store.
pub async fn handle_get_evaluation(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchStatusResponse>, AppError> {
    let Some(handle) = state.batches.get(batch_id) else {
        let sessions = state.store.batch_sessions(batch_id).await?;
        if sessions.is_empty() {
            return Err(AppError::NotFound(format!("batch {batch_id}")));
        }
        let run = BatchRun::from_stored(batch_id, sessions);
        return Ok(Json(BatchStatusResponse {
            batch_id,
            status: BatchStatus::Finished,
            progress: run.summary,
            result: Some(Arc::new(run)),
        }));
    };

    let result = handle.outcome();
    let status = match (&result, handle.cancel.is_cancelled()) {
        (Some(_), _) => BatchStatus::Finished,
        (None, true) => BatchStatus::Cancelling,
        (None, false) => BatchStatus::Running,
    };
    Ok(Json(BatchStatusResponse {
        batch_id,
        status,
        progress: handle.progress.snapshot(),
        result,
    }))
}

/// POST /api/v1/evaluations/:batch_id/cancel
pub async fn handle_cancel_evaluation(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<(StatusCode, Json<BatchStatusResponse>), AppError> {
    let handle = state
        .batches
        .get(batch_id)
        .ok_or_else(|| AppError::NotFound(format!("batch {batch_id}")))?;

    let result = handle.outcome();
    if result.is_none() {
        info!(batch_id = %batch_id, "Batch cancellation requested");
        handle.cancel.cancel();
    }
    let status = if result.is_some() {
        BatchStatus::Finished
    } else {
        BatchStatus::Cancelling
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(BatchStatusResponse {
            batch_id,
            status,
            progress: handle.progress.snapshot(),
            result,
        }),
    ))
}

/// GET /api/v1/sessions?limit=N
pub async fn handle_list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<SessionsResponse>, AppError> {
    let sessions = state
        .store
        .recent_sessions(query.limit.min(MAX_SESSIONS_LIMIT))
        .await?;
    let statistics = ScoreStatistics::from_evaluations(
        sessions.iter().filter_map(|s| s.final_evaluation.as_ref()),
    );
    Ok(Json(SessionsResponse {
        statistics,
        sessions,
    }))
}

/// GET /api/v1/credentials
pub async fn handle_list_credentials(State(state): State<AppState>) -> Json<CredentialsResponse> {
    Json(CredentialsResponse {
        active: state.pool.active_count(),
        credentials: state.pool.snapshot(),
    })
}
