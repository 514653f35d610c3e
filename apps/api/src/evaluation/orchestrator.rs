//! Pipeline Orchestrator: drives one session through the five stages.
//!
//! Each stage's input is built from the typed outputs of earlier stages. Any
//! `StageFailed` ends the session in FAILED with the results gathered so far;
//! cancellation ends it in CANCELLED.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::evaluation::error::{Defect, StageError};
use crate::evaluation::executor::StageExecutor;
use crate::evaluation::qualification::{
    is_placeholder_name, name_from_filename, names_match, QualificationPolicy,
};
use crate::evaluation::requirements_cache::{RequirementsError, RequirementsSlot};
use crate::evaluation::session::{
    Correction, EvaluationSession, FinalEvaluation, SessionFailure, SessionState,
};
use crate::evaluation::stages::{StageCatalog, StageKind, StageOutput, StageResult};
use crate::evaluation::validator::SoftDefect;
use crate::extraction::Extraction;

/// The job description a batch is evaluated against, with its shared requirements slot.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub description: Arc<str>,
    pub requirements: Arc<RequirementsSlot>,
}

pub struct PipelineOrchestrator {
    executor: Arc<StageExecutor>,
    catalog: Arc<StageCatalog>,
    policy: QualificationPolicy,
}

impl PipelineOrchestrator {
    pub fn new(
        executor: Arc<StageExecutor>,
        catalog: Arc<StageCatalog>,
        policy: QualificationPolicy,
    ) -> Self {
        Self {
            executor,
            catalog,
            policy,
        }
    }

    /// Runs `session` to a terminal state and hands it back.
    pub async fn run(
        &self,
        mut session: EvaluationSession,
        extraction: &Extraction,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> EvaluationSession {
        if cancel.is_cancelled() {
            session.cancel();
            return session;
        }
        if !extraction.is_usable() {
            warn!(
                session_id = %session.id,
                filename = %session.filename,
                "Candidate document is unreadable"
            );
            session.fail(SessionFailure::before_stages(Defect::UnreadableDocument));
            return session;
        }
        session.advance(SessionState::ExtractingResume);

        // Stage 1
        let Some(mut resume) = self
            .run_stage(&mut session, StageKind::ResumeAnalyzer, json!({ "resume": extraction.text }), cancel)
            .await
        else {
            return session;
        };
        replace_placeholder_name(&mut resume, &session.filename);
        let resume = Arc::new(resume);
        session.record(resume.clone(), SessionState::ResumeAnalyzed);

        // Stage 2, shared across the batch
        let requirements = match self.requirements(&session, job, cancel).await {
            Ok(requirements) => requirements,
            Err(RequirementsError::Failed(failed)) => {
                error!(
                    session_id = %session.id,
                    stage = %StageKind::JobRequirements,
                    "Job description could not be analyzed: {}", failed.defect
                );
                session.failed_attempts.extend(failed.attempts.iter().cloned());
                session.fail(SessionFailure {
                    defect: Defect::JobDescriptionUnanalyzable,
                    ..SessionFailure::from_stage(&failed)
                });
                return session;
            }
            Err(RequirementsError::Aborted(reason)) => {
                error!(
                    session_id = %session.id,
                    stage = %StageKind::JobRequirements,
                    "Job requirements analysis aborted: {reason}"
                );
                session.fail(SessionFailure {
                    stage: Some(StageKind::JobRequirements),
                    ..SessionFailure::before_stages(Defect::JobDescriptionUnanalyzable)
                });
                return session;
            }
            Err(RequirementsError::Cancelled) => {
                session.cancel();
                return session;
            }
        };
        session.record(requirements.clone(), SessionState::RequirementsReady);

        let resume_name = candidate_name(&resume);
        let resume_json = output_json(&resume);
        let requirements_json = output_json(&requirements);

        // Stage 3
        let evaluation_context = json!({
            "resume": resume_json,
            "requirements": requirements_json,
        });
        let Some(mut evaluation) = self
            .run_stage(&mut session, StageKind::AdvancedEvaluator, evaluation_context, cancel)
            .await
        else {
            return session;
        };
        reconcile_name(&mut evaluation, &resume_name);
        let evaluation = Arc::new(evaluation);
        session.record(evaluation.clone(), SessionState::Evaluated);
        let evaluation_json = output_json(&evaluation);

        // Stage 4
        let interview_context = json!({
            "resume": resume_json,
            "requirements": requirements_json,
            "evaluation": evaluation_json,
        });
        let Some(interview) = self
            .run_stage(&mut session, StageKind::InterviewStrategist, interview_context, cancel)
            .await
        else {
            return session;
        };
        let interview = Arc::new(interview);
        session.record(interview.clone(), SessionState::Strategized);

        // Stage 5
        let review_context = json!({
            "resume": resume_json,
            "requirements": requirements_json,
            "evaluation": evaluation_json,
            "interview_plan": output_json(&interview),
        });
        let Some(mut review) = self
            .run_stage(&mut session, StageKind::QualityAssurance, review_context, cancel)
            .await
        else {
            return session;
        };
        reconcile_name(&mut review, &resume_name);
        let overqualification_signal = evaluation
            .evaluation()
            .map(|e| e.overqualification_signal)
            .unwrap_or(false);
        self.enforce_tag(&mut review, overqualification_signal);
        let review = Arc::new(review);
        session.results.push(review);

        match final_evaluation(&session) {
            Some(evaluation) => {
                info!(
                    session_id = %session.id,
                    score = evaluation.overall_score,
                    tag = %evaluation.qualification_tag,
                    "Session complete"
                );
                session.complete(evaluation);
            }
            None => {
                error!(session_id = %session.id, "Session results incomplete after final stage");
                session.fail(SessionFailure {
                    stage: Some(StageKind::QualityAssurance),
                    ..SessionFailure::before_stages(Defect::UnparseableOutput)
                });
            }
        }
        session
    }

    /// Runs one stage, moving the session to FAILED or CANCELLED when it cannot finish.
    async fn run_stage(
        &self,
        session: &mut EvaluationSession,
        stage: StageKind,
        context: Value,
        cancel: &CancellationToken,
    ) -> Option<StageResult> {
        debug!(session_id = %session.id, stage = %stage, state = session.state.as_str(), "Starting stage");
        match self
            .executor
            .run(session.id, self.catalog.spec(stage), &context, cancel)
            .await
        {
            Ok(result) => Some(result),
            Err(StageError::Failed(failed)) => {
                error!(
                    session_id = %session.id,
                    stage = %stage,
                    defect = failed.defect.category(),
                    attempts_exhausted = failed.attempts_exhausted,
                    "Session failed"
                );
                session.fail_stage(&failed);
                None
            }
            Err(StageError::Cancelled(_)) => {
                info!(session_id = %session.id, stage = %stage, "Session cancelled");
                session.cancel();
                None
            }
        }
    }

    async fn requirements(
        &self,
        session: &EvaluationSession,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<Arc<StageResult>, RequirementsError> {
        let executor = self.executor.clone();
        let spec = self.catalog.spec(StageKind::JobRequirements).clone();
        let context = json!({ "job_description": &*job.description });
        let session_id = session.id;
        job.requirements
            .get_or_compute(cancel, move |shared| {
                let executor = executor.clone();
                let spec = spec.clone();
                let context = context.clone();
                async move { executor.run(session_id, &spec, &context, &shared).await }
            })
            .await
    }

    /// Overwrites a proposed tag that the score does not support.
    fn enforce_tag(&self, review: &mut StageResult, overqualification_signal: bool) {
        let StageOutput::Review(output) = &mut review.output else {
            return;
        };
        let expected = self.policy.tag_for(output.overall_score, overqualification_signal);
        if output.qualification_tag != expected {
            warn!(
                stage = %review.stage,
                proposed = %output.qualification_tag,
                recomputed = %expected,
                score = output.overall_score,
                "Qualification tag recomputed from score"
            );
            review.soft_defects.push(SoftDefect::TagRecomputed {
                field: "qualification_tag".to_string(),
                proposed: output.qualification_tag.to_string(),
                recomputed: expected.to_string(),
            });
            output.qualification_tag = expected;
        }
    }
}

fn output_json(result: &StageResult) -> Value {
    let value = match &result.output {
        StageOutput::Resume(r) => serde_json::to_value(r),
        StageOutput::Requirements(r) => serde_json::to_value(r),
        StageOutput::Evaluation(e) => serde_json::to_value(e),
        StageOutput::Interview(i) => serde_json::to_value(i),
        StageOutput::Review(r) => serde_json::to_value(r),
    };
    value.unwrap_or_else(|_| Value::Object(Map::new()))
}

fn candidate_name(resume: &StageResult) -> String {
    resume
        .resume()
        .map(|r| r.candidate_name.clone())
        .unwrap_or_default()
}

/// The Resume Analyzer sometimes answers with "John Doe" and the like; the
/// filename is a better guess than a placeholder.
fn replace_placeholder_name(resume: &mut StageResult, filename: &str) {
    let StageOutput::Resume(profile) = &mut resume.output else {
        return;
    };
    if !is_placeholder_name(&profile.candidate_name) {
        return;
    }
    let replacement = name_from_filename(filename);
    if replacement.is_empty() {
        return;
    }
    warn!(
        stage = %resume.stage,
        original = %profile.candidate_name,
        replacement = %replacement,
        "Placeholder candidate name replaced"
    );
    resume.soft_defects.push(SoftDefect::PlaceholderName {
        field: "candidate_name".to_string(),
        original: std::mem::replace(&mut profile.candidate_name, replacement.clone()),
        replacement,
    });
}

/// The resume's name wins over whatever a later stage proposes.
fn reconcile_name(result: &mut StageResult, resume_name: &str) {
    let proposed = match &mut result.output {
        StageOutput::Evaluation(e) => &mut e.candidate_name,
        StageOutput::Review(r) => &mut r.candidate_name,
        _ => return,
    };
    if resume_name.is_empty() || names_match(proposed, resume_name) {
        return;
    }
    warn!(
        stage = %result.stage,
        proposed = %proposed,
        kept = %resume_name,
        "Candidate name reconciled with resume"
    );
    let original = std::mem::replace(proposed, resume_name.to_string());
    result.soft_defects.push(SoftDefect::NameReconciled {
        field: "candidate_name".to_string(),
        proposed: original,
        kept: resume_name.to_string(),
    });
}

fn final_evaluation(session: &EvaluationSession) -> Option<FinalEvaluation> {
    let resume = session.result_for(StageKind::ResumeAnalyzer)?.resume()?;
    let evaluation = session.result_for(StageKind::AdvancedEvaluator)?.evaluation()?;
    let interview = session.result_for(StageKind::InterviewStrategist)?.interview()?;
    let review = session.result_for(StageKind::QualityAssurance)?.review()?;

    let corrections = session
        .results
        .iter()
        .flat_map(|result| {
            result.soft_defects.iter().map(|defect| Correction {
                stage: result.stage,
                defect: defect.clone(),
            })
        })
        .collect();

    Some(FinalEvaluation {
        candidate_name: resume.candidate_name.clone(),
        resume_filename: session.filename.clone(),
        overall_score: review.overall_score,
        qualification_tag: review.qualification_tag,
        category_scores: evaluation.category_scores.clone(),
        strengths: prefer_non_empty(&review.strengths, &evaluation.strengths),
        areas_of_concern: prefer_non_empty(&review.areas_of_concern, &evaluation.areas_of_concern),
        recommendations: review
            .recommendations
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| evaluation.recommendations.clone()),
        interview_plan: interview.clone(),
        corrections,
    })
}

fn prefer_non_empty<T: Clone>(primary: &[T], fallback: &[T]) -> Vec<T> {
    if primary.is_empty() {
        fallback.to_vec()
    } else {
        primary.to_vec()
    }
}
