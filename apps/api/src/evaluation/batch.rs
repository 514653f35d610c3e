//! Batch Coordinator: one session per candidate document, bounded concurrency.
//!
//! A failed session never aborts the batch. Cancellation stops new sessions
//! from starting; sessions already running finish their in-flight call and
//! then end as CANCELLED.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::evaluation::credentials::CredentialPool;
use crate::evaluation::error::Defect;
use crate::evaluation::orchestrator::{JobContext, PipelineOrchestrator};
use crate::evaluation::requirements_cache::{self, JobRequirementsCache};
use crate::evaluation::session::{EvaluationSession, SessionState};
use crate::evaluation::statistics::ScoreStatistics;
use crate::extraction::{CandidateDocument, TextExtractor};
use crate::storage::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub max_concurrency: usize,
    pub max_batch_size: usize,
    /// Distinct job descriptions whose requirements are kept for reuse.
    pub requirements_cache_capacity: usize,
    /// How long a finished batch stays in the registry.
    pub retention: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_batch_size: 50,
            requirements_cache_capacity: requirements_cache::DEFAULT_CAPACITY,
            retention: DEFAULT_RETENTION,
        }
    }
}

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("job description is empty")]
    EmptyJobDescription,

    #[error("batch has no candidate documents")]
    NoCandidates,

    #[error("batch of {size} documents exceeds the limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Rejects a batch before any session is created.
pub fn check_batch(
    job_description: &str,
    candidates: usize,
    settings: &BatchSettings,
) -> Result<(), BatchError> {
    if job_description.trim().is_empty() {
        return Err(BatchError::EmptyJobDescription);
    }
    if candidates == 0 {
        return Err(BatchError::NoCandidates);
    }
    if candidates > settings.max_batch_size {
        return Err(BatchError::TooLarge {
            size: candidates,
            limit: settings.max_batch_size,
        });
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Progress and results
// ────────────────────────────────────────────────────────────────────────────

/// Live counters, updated as sessions reach a terminal state.
#[derive(Debug, Default)]
pub struct BatchProgress {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub in_progress: usize,
}

impl BatchProgress {
    fn start(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn finish(&self, state: SessionState) {
        let counter = match state {
            SessionState::Complete => &self.succeeded,
            SessionState::Failed => &self.failed,
            SessionState::Cancelled => &self.cancelled,
            _ => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> BatchSummary {
        let total = self.total.load(Ordering::SeqCst);
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        BatchSummary {
            total,
            succeeded,
            failed,
            cancelled,
            in_progress: total.saturating_sub(succeeded + failed + cancelled),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    pub id: Uuid,
    /// In document order.
    pub sessions: Vec<EvaluationSession>,
    pub summary: BatchSummary,
    pub statistics: ScoreStatistics,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchRun {
    /// Rebuilds a finished batch from its persisted sessions. Warnings are not stored.
    pub fn from_stored(id: Uuid, sessions: Vec<EvaluationSession>) -> Self {
        let progress = BatchProgress::default();
        progress.start(sessions.len());
        for session in &sessions {
            progress.finish(session.state);
        }
        let statistics = ScoreStatistics::from_evaluations(
            sessions.iter().filter_map(|s| s.final_evaluation.as_ref()),
        );
        let started_at = sessions
            .iter()
            .map(|s| s.created_at)
            .min()
            .unwrap_or_else(Utc::now);
        let finished_at = sessions
            .iter()
            .filter_map(|s| s.finished_at)
            .max()
            .unwrap_or(started_at);
        Self {
            id,
            summary: progress.snapshot(),
            sessions,
            statistics,
            warnings: Vec::new(),
            started_at,
            finished_at,
        }
    }
}

/// A batch that was accepted and is running (or has finished) in the background.
#[derive(Debug)]
pub struct BatchHandle {
    pub id: Uuid,
    pub progress: Arc<BatchProgress>,
    pub cancel: CancellationToken,
    completion: Mutex<Completion>,
}

#[derive(Debug, Default)]
struct Completion {
    run: Option<Arc<BatchRun>>,
    at: Option<Instant>,
}

impl BatchHandle {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            progress: Arc::new(BatchProgress::default()),
            cancel: CancellationToken::new(),
            completion: Mutex::new(Completion::default()),
        }
    }

    pub fn outcome(&self) -> Option<Arc<BatchRun>> {
        self.lock().run.clone()
    }

    fn set_outcome(&self, run: BatchRun) {
        let mut completion = self.lock();
        completion.run = Some(Arc::new(run));
        completion.at = Some(Instant::now());
    }

    /// Marks a batch that ended without a result.
    fn abandon(&self) {
        self.lock().at.get_or_insert_with(Instant::now);
    }

    fn expired(&self, retention: Duration, now: Instant) -> bool {
        self.lock()
            .at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }

    fn lock(&self) -> MutexGuard<'_, Completion> {
        self.completion.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Batches by id. Running batches stay until they finish; finished ones are
/// dropped `retention` later, after which their sessions live only in the store.
#[derive(Debug)]
pub struct BatchRegistry {
    retention: Duration,
    batches: RwLock<HashMap<Uuid, Arc<BatchHandle>>>,
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl BatchRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            batches: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<BatchHandle>> {
        self.batches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .filter(|handle| !handle.expired(self.retention, Instant::now()))
            .cloned()
    }

    fn insert(&self, handle: Arc<BatchHandle>) {
        let mut batches = self.batches.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = batches.len();
        batches.retain(|_, existing| !existing.expired(self.retention, now));
        let evicted = before - batches.len();
        if evicted > 0 {
            debug!(evicted, "Dropped finished batches past retention");
        }
        batches.insert(handle.id, handle);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.batches.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coordinator
// ────────────────────────────────────────────────────────────────────────────

pub struct BatchCoordinator {
    orchestrator: Arc<PipelineOrchestrator>,
    pool: Arc<CredentialPool>,
    cache: Arc<JobRequirementsCache>,
    extractor: Arc<dyn TextExtractor>,
    store: Arc<dyn SessionStore>,
    settings: BatchSettings,
}

impl BatchCoordinator {
    pub fn new(
        orchestrator: Arc<PipelineOrchestrator>,
        pool: Arc<CredentialPool>,
        extractor: Arc<dyn TextExtractor>,
        store: Arc<dyn SessionStore>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            orchestrator,
            pool,
            cache: Arc::new(JobRequirementsCache::new(settings.requirements_cache_capacity)),
            extractor,
            store,
            settings,
        }
    }

    /// Validates the batch, registers it and runs it on a background task.
    pub fn start(
        self: &Arc<Self>,
        registry: &BatchRegistry,
        job_description: String,
        documents: Vec<CandidateDocument>,
    ) -> Result<Arc<BatchHandle>, BatchError> {
        check_batch(&job_description, documents.len(), &self.settings)?;
        let handle = Arc::new(BatchHandle::new(Uuid::new_v4()));
        registry.insert(handle.clone());

        let coordinator = Arc::clone(self);
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let result = coordinator
                .run_batch(
                    task_handle.id,
                    &job_description,
                    documents,
                    task_handle.progress.clone(),
                    task_handle.cancel.clone(),
                )
                .await;
            match result {
                Ok(run) => task_handle.set_outcome(run),
                Err(e) => {
                    error!(batch_id = %task_handle.id, "Batch rejected: {e}");
                    task_handle.abandon();
                }
            }
        });
        Ok(handle)
    }

    pub async fn run_batch(
        &self,
        batch_id: Uuid,
        job_description: &str,
        documents: Vec<CandidateDocument>,
        progress: Arc<BatchProgress>,
        cancel: CancellationToken,
    ) -> Result<BatchRun, BatchError> {
        check_batch(job_description, documents.len(), &self.settings)?;
        let started_at = Utc::now();
        let mut warnings = Vec::new();

        let revived = self.pool.revive_exhausted();
        if revived > 0 {
            info!(batch_id = %batch_id, revived, "Revived exhausted credentials");
        }
        if self.pool.active_count() == 0 {
            warn!(batch_id = %batch_id, "No active credential at batch start");
            warnings.push("no credential was active when the batch started".to_string());
        }

        progress.start(documents.len());
        info!(
            batch_id = %batch_id,
            candidates = documents.len(),
            max_concurrency = self.settings.max_concurrency,
            "Batch started"
        );

        let job = JobContext {
            description: Arc::from(job_description),
            requirements: self.cache.slot_for(job_description),
        };

        let mut finished: Vec<(usize, EvaluationSession)> =
            stream::iter(documents.into_iter().enumerate())
                .map(|(index, document)| {
                    let job = &job;
                    let cancel = &cancel;
                    let progress = &progress;
                    async move {
                        let session = self.evaluate(batch_id, index, document, job, cancel).await;
                        progress.finish(session.state);
                        (index, session)
                    }
                })
                .buffer_unordered(self.settings.max_concurrency.max(1))
                .collect()
                .await;
        finished.sort_by_key(|(index, _)| *index);
        let sessions: Vec<EvaluationSession> =
            finished.into_iter().map(|(_, session)| session).collect();

        let starved = sessions
            .iter()
            .filter(|s| {
                s.failure
                    .as_ref()
                    .is_some_and(|f| f.defect == Defect::PoolExhausted)
            })
            .count();
        if starved > 0 {
            warn!(batch_id = %batch_id, sessions = starved, "Credential pool exhausted during batch");
            warnings.push(format!(
                "credential pool exhausted: {starved} session(s) failed without a credential"
            ));
        }

        let statistics = ScoreStatistics::from_evaluations(
            sessions.iter().filter_map(|s| s.final_evaluation.as_ref()),
        );
        let summary = progress.snapshot();
        info!(
            batch_id = %batch_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Batch finished"
        );

        Ok(BatchRun {
            id: batch_id,
            sessions,
            summary,
            statistics,
            warnings,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn evaluate(
        &self,
        batch_id: Uuid,
        index: usize,
        document: CandidateDocument,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> EvaluationSession {
        let mut session = EvaluationSession::new(batch_id, document.filename.clone());
        session.position = u32::try_from(index).unwrap_or(u32::MAX);
        if cancel.is_cancelled() {
            session.cancel();
        } else {
            let extraction = self.extractor.extract(&document);
            session = self.orchestrator.run(session, &extraction, job, cancel).await;
        }
        if let Err(e) = self.store.persist(&session).await {
            error!(session_id = %session.id, batch_id = %batch_id, "Failed to persist session: {e:#}");
        }
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::evaluation::credentials::{AttemptOutcome, CredentialStatus, PoolPolicy};
    use crate::evaluation::executor::{RetryPolicy, StageExecutor};
    use crate::evaluation::invoker::InvokeError;
    use crate::evaluation::qualification::QualificationPolicy;
    use crate::evaluation::stages::{StageCatalog, StageKind, StageLimits};
    use crate::evaluation::testing::{fixtures, Reply, ScriptedInvoker};
    use crate::extraction::PlainTextExtractor;
    use crate::storage::InMemorySessionStore;

    struct Harness {
        invoker: Arc<ScriptedInvoker>,
        pool: Arc<CredentialPool>,
        store: Arc<InMemorySessionStore>,
        coordinator: Arc<BatchCoordinator>,
    }

    fn harness(invoker: ScriptedInvoker, credentials: usize, max_concurrency: usize) -> Harness {
        let invoker = Arc::new(invoker);
        let pool = Arc::new(CredentialPool::new(
            (1..=credentials).map(|i| format!("sk-{i}")).collect(),
            PoolPolicy::default(),
        ));
        let executor = Arc::new(StageExecutor::new(
            pool.clone(),
            invoker.clone(),
            RetryPolicy::immediate(),
        ));
        let catalog = Arc::new(StageCatalog::uniform(StageLimits {
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            executor,
            catalog,
            QualificationPolicy::default(),
        ));
        let store = Arc::new(InMemorySessionStore::new());
        let coordinator = Arc::new(BatchCoordinator::new(
            orchestrator,
            pool.clone(),
            Arc::new(PlainTextExtractor),
            store.clone(),
            BatchSettings {
                max_concurrency,
                max_batch_size: 10,
                ..BatchSettings::default()
            },
        ));
        Harness {
            invoker,
            pool,
            store,
            coordinator,
        }
    }

    fn documents(n: usize) -> Vec<CandidateDocument> {
        (0..n)
            .map(|i| CandidateDocument::from_text(format!("candidate_{i}.txt"), "5 years Python, BS CS"))
            .collect()
    }

    async fn run(h: &Harness, docs: Vec<CandidateDocument>, cancel: CancellationToken) -> BatchRun {
        h.coordinator
            .run_batch(
                Uuid::new_v4(),
                "3+ years backend",
                docs,
                Arc::new(BatchProgress::default()),
                cancel,
            )
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_requirements_computed_once_per_batch() {
        let invoker = ScriptedInvoker::happy();
        invoker.set_default(
            StageKind::JobRequirements,
            Reply::Delayed(Duration::from_millis(200), fixtures::requirements("Backend Engineer")),
        );
        let h = harness(invoker, 5, 4);

        let run = run(&h, documents(4), CancellationToken::new()).await;

        assert_eq!(run.summary.succeeded, 4);
        assert_eq!(h.invoker.calls_for(StageKind::JobRequirements), 1);
        assert_eq!(h.invoker.calls_for(StageKind::ResumeAnalyzer), 4);
    }

    #[tokio::test]
    async fn test_failed_session_does_not_abort_batch() {
        let h = harness(ScriptedInvoker::happy(), 5, 2);
        let mut docs = documents(3);
        docs[1] = CandidateDocument {
            filename: "scan.pdf".into(),
            content: vec![0xff, 0xfe, 0xfd],
        };

        let run = run(&h, docs, CancellationToken::new()).await;

        assert_eq!(
            run.summary,
            BatchSummary {
                total: 3,
                succeeded: 2,
                failed: 1,
                cancelled: 0,
                in_progress: 0
            }
        );
        assert_eq!(run.sessions[1].filename, "scan.pdf");
        assert_eq!(
            run.sessions[1].failure.as_ref().unwrap().defect,
            Defect::UnreadableDocument
        );
        assert_eq!(run.statistics.evaluated, 2);
        assert_eq!(h.store.len(), 3);
    }

    #[tokio::test]
    async fn test_unanalyzable_job_description_fails_every_session() {
        let invoker = ScriptedInvoker::happy();
        invoker.set_default(
            StageKind::JobRequirements,
            Reply::Fail(InvokeError::Transport("reset".into())),
        );
        let h = harness(invoker, 5, 3);

        let run = run(&h, documents(3), CancellationToken::new()).await;

        assert_eq!(run.summary.failed, 3);
        for session in &run.sessions {
            assert_eq!(
                session.failure.as_ref().unwrap().defect,
                Defect::JobDescriptionUnanalyzable
            );
        }
        assert_eq!(h.invoker.calls_for(StageKind::JobRequirements), 3);
        assert_eq!(h.invoker.calls_for(StageKind::AdvancedEvaluator), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let invoker = ScriptedInvoker::happy();
        invoker.set_default(
            StageKind::ResumeAnalyzer,
            Reply::Delayed(Duration::from_millis(100), fixtures::resume("Ada Lovelace", 5)),
        );
        let h = harness(invoker, 5, 2);

        let run = run(&h, documents(6), CancellationToken::new()).await;

        assert_eq!(run.summary.succeeded, 6);
        assert!(h.invoker.peak_in_flight() <= 2);
        assert!(h.invoker.peak_in_flight() >= 1);
        let positions: Vec<u32> = run.sessions.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_cancel_marks_remaining_sessions_cancelled() {
        let invoker = ScriptedInvoker::happy();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        invoker.on_call(move |call| {
            if call.stage == StageKind::AdvancedEvaluator {
                trigger.cancel();
            }
        });
        let h = harness(invoker, 5, 1);

        let run = run(&h, documents(3), cancel).await;

        assert_eq!(run.summary.cancelled, 3);
        assert_eq!(run.summary.failed, 0);
        // The in-flight evaluator call finished and its result was kept.
        let first = &run.sessions[0];
        assert_eq!(first.state, SessionState::Cancelled);
        assert_eq!(first.results.len(), 3);
        assert_eq!(h.invoker.calls_for(StageKind::ResumeAnalyzer), 1);
        assert_eq!(h.invoker.calls_for(StageKind::InterviewStrategist), 0);
        assert!(run.sessions[1..].iter().all(|s| s.results.is_empty()));
        assert_eq!(h.store.len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_credentials_revived_at_batch_start() {
        let h = harness(ScriptedInvoker::happy(), 1, 1);
        for _ in 0..3 {
            h.pool.report("key-1", AttemptOutcome::TransportError);
        }
        assert_eq!(h.pool.snapshot()[0].status, CredentialStatus::Exhausted);

        let run = run(&h, documents(1), CancellationToken::new()).await;

        assert_eq!(run.summary.succeeded, 1);
        assert!(run.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_pool_exhaustion_is_reported_as_warning() {
        let invoker = ScriptedInvoker::happy();
        invoker.set_default(
            StageKind::ResumeAnalyzer,
            Reply::Fail(InvokeError::Unauthorized { status: 401 }),
        );
        let h = harness(invoker, 2, 1);

        let run = run(&h, documents(2), CancellationToken::new()).await;

        assert_eq!(run.summary.failed, 2);
        assert_eq!(
            run.sessions[1].failure.as_ref().unwrap().defect,
            Defect::PoolExhausted
        );
        assert_eq!(run.warnings.len(), 1);
    }

    #[test]
    fn test_check_batch_limits() {
        let settings = BatchSettings {
            max_concurrency: 2,
            max_batch_size: 2,
            ..BatchSettings::default()
        };
        assert_eq!(check_batch("  ", 1, &settings), Err(BatchError::EmptyJobDescription));
        assert_eq!(check_batch("jd", 0, &settings), Err(BatchError::NoCandidates));
        assert_eq!(
            check_batch("jd", 3, &settings),
            Err(BatchError::TooLarge { size: 3, limit: 2 })
        );
        assert!(check_batch("jd", 2, &settings).is_ok());
    }

    #[tokio::test]
    async fn test_start_registers_batch_and_publishes_outcome() {
        let h = harness(ScriptedInvoker::happy(), 5, 2);
        let registry = BatchRegistry::default();

        let handle = h
            .coordinator
            .start(&registry, "3+ years backend".into(), documents(2))
            .unwrap();
        assert!(registry.get(handle.id).is_some());

        for _ in 0..100 {
            if handle.outcome().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let outcome = handle.outcome().unwrap();
        assert_eq!(outcome.summary.succeeded, 2);
        assert_eq!(handle.progress.snapshot().in_progress, 0);
    }

    #[tokio::test]
    async fn test_cancelling_one_batch_leaves_shared_requirements_to_the_other() {
        let invoker = ScriptedInvoker::happy();
        invoker.push(
            StageKind::JobRequirements,
            Reply::Fail(InvokeError::Transport("reset".into())),
        );
        let cancel_a = CancellationToken::new();
        let trigger = cancel_a.clone();
        invoker.on_call(move |call| {
            if call.stage == StageKind::JobRequirements {
                trigger.cancel();
            }
        });
        let h = harness(invoker, 5, 1);

        let (run_a, run_b) = tokio::join!(
            run(&h, documents(1), cancel_a),
            run(&h, documents(1), CancellationToken::new()),
        );

        assert_eq!(run_a.summary.cancelled, 1);
        assert_eq!(run_b.summary.succeeded, 1);
        // One shared analysis: the failed attempt plus its retry.
        assert_eq!(h.invoker.calls_for(StageKind::JobRequirements), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_batches_expire_after_retention() {
        let registry = BatchRegistry::new(Duration::from_secs(60));
        let finished = Arc::new(BatchHandle::new(Uuid::new_v4()));
        let running = Arc::new(BatchHandle::new(Uuid::new_v4()));
        registry.insert(finished.clone());
        registry.insert(running.clone());
        finished.set_outcome(BatchRun::from_stored(finished.id, Vec::new()));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(registry.get(finished.id).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.get(finished.id).is_none());
        assert!(registry.get(running.id).is_some());
        assert_eq!(registry.len(), 2);

        registry.insert(Arc::new(BatchHandle::new(Uuid::new_v4())));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_stored_sessions_rebuild_summary_and_statistics() {
        let batch_id = Uuid::new_v4();
        let mut failed = EvaluationSession::new(batch_id, "scan.pdf");
        failed.fail(crate::evaluation::session::SessionFailure::before_stages(
            Defect::UnreadableDocument,
        ));
        let mut cancelled = EvaluationSession::new(batch_id, "ada.txt");
        cancelled.cancel();

        let run = BatchRun::from_stored(batch_id, vec![failed, cancelled]);

        assert_eq!(run.summary.total, 2);
        assert_eq!(run.summary.failed, 1);
        assert_eq!(run.summary.cancelled, 1);
        assert_eq!(run.summary.in_progress, 0);
        assert_eq!(run.statistics.evaluated, 0);
        assert!(run.finished_at >= run.started_at);
    }
}
