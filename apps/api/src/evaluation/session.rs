//! Evaluation session: one candidate document against one job description.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evaluation::error::{Defect, StageFailed};
use crate::evaluation::executor::StageAttempt;
use crate::evaluation::qualification::QualificationTag;
use crate::evaluation::stages::{CategoryScores, InterviewPlan, StageKind, StageResult};
use crate::evaluation::validator::SoftDefect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    ExtractingResume,
    ResumeAnalyzed,
    RequirementsReady,
    Evaluated,
    Strategized,
    Complete,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Complete | SessionState::Failed | SessionState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "CREATED",
            SessionState::ExtractingResume => "EXTRACTING_RESUME",
            SessionState::ResumeAnalyzed => "RESUME_ANALYZED",
            SessionState::RequirementsReady => "REQUIREMENTS_READY",
            SessionState::Evaluated => "EVALUATED",
            SessionState::Strategized => "STRATEGIZED",
            SessionState::Complete => "COMPLETE",
            SessionState::Failed => "FAILED",
            SessionState::Cancelled => "CANCELLED",
        }
    }
}

/// First unrecoverable defect of a FAILED session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    /// `None` when the session failed before any stage ran.
    pub stage: Option<StageKind>,
    pub defect: Defect,
    pub attempts_exhausted: bool,
    pub transport_failures: u32,
    pub schema_failures: u32,
}

impl SessionFailure {
    pub fn before_stages(defect: Defect) -> Self {
        Self {
            stage: None,
            defect,
            attempts_exhausted: false,
            transport_failures: 0,
            schema_failures: 0,
        }
    }

    pub fn from_stage(failed: &StageFailed) -> Self {
        Self {
            stage: Some(failed.stage),
            defect: failed.defect.clone(),
            attempts_exhausted: failed.attempts_exhausted,
            transport_failures: failed.transport_failures,
            schema_failures: failed.schema_failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub stage: StageKind,
    pub defect: SoftDefect,
}

/// Result record of a COMPLETE session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalEvaluation {
    pub candidate_name: String,
    pub resume_filename: String,
    pub overall_score: u8,
    pub qualification_tag: QualificationTag,
    pub category_scores: CategoryScores,
    pub strengths: Vec<String>,
    pub areas_of_concern: Vec<String>,
    pub recommendations: Option<String>,
    pub interview_plan: InterviewPlan,
    pub corrections: Vec<Correction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSession {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// Index of the candidate document within its batch.
    #[serde(default)]
    pub position: u32,
    pub filename: String,
    pub state: SessionState,
    /// Ordered by stage ordinal. Shared with the requirements cache, never mutated.
    pub results: Vec<Arc<StageResult>>,
    /// Attempts of failed stages; successful stages carry theirs inside the result.
    pub failed_attempts: Vec<StageAttempt>,
    pub failure: Option<SessionFailure>,
    pub final_evaluation: Option<FinalEvaluation>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EvaluationSession {
    pub fn new(batch_id: Uuid, filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            position: 0,
            filename: filename.into(),
            state: SessionState::Created,
            results: Vec::new(),
            failed_attempts: Vec::new(),
            failure: None,
            final_evaluation: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Moves forward to `next`. Returns `false` (leaving the state untouched) when
    /// that would revisit an earlier state or leave a terminal one.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() || next <= self.state {
            return false;
        }
        self.state = next;
        true
    }

    /// Appends a stage result and advances to the state it unlocks.
    pub fn record(&mut self, result: Arc<StageResult>, next: SessionState) {
        if self.results.iter().any(|r| r.stage == result.stage) {
            return;
        }
        self.results.push(result);
        self.advance(next);
    }

    pub fn result_for(&self, stage: StageKind) -> Option<&Arc<StageResult>> {
        self.results.iter().find(|r| r.stage == stage)
    }

    pub fn fail(&mut self, failure: SessionFailure) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Failed;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    pub fn fail_stage(&mut self, failed: &StageFailed) {
        self.failed_attempts.extend(failed.attempts.iter().cloned());
        self.fail(SessionFailure::from_stage(failed));
    }

    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn complete(&mut self, evaluation: FinalEvaluation) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Complete;
        self.final_evaluation = Some(evaluation);
        self.finished_at = Some(Utc::now());
    }
}
