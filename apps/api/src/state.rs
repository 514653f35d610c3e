use std::sync::Arc;

use crate::config::Config;
use crate::evaluation::batch::{BatchCoordinator, BatchRegistry};
use crate::evaluation::credentials::CredentialPool;
use crate::evaluation::executor::StageExecutor;
use crate::evaluation::invoker::StageInvoker;
use crate::evaluation::orchestrator::PipelineOrchestrator;
use crate::extraction::PlainTextExtractor;
use crate::storage::SessionStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: Arc<BatchCoordinator>,
    /// Same pool the coordinator's executor draws from; exposed for the operator snapshot.
    pub pool: Arc<CredentialPool>,
    pub batches: Arc<BatchRegistry>,
    /// Read path for batches no longer held in `batches`.
    pub store: Arc<dyn SessionStore>,
}

impl AppState {
    /// Wires pool → executor → orchestrator → coordinator from configuration.
    pub fn build(
        config: Config,
        invoker: Arc<dyn StageInvoker>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let pool = Arc::new(CredentialPool::new(config.credentials.clone(), config.pool));
        let executor = Arc::new(StageExecutor::new(pool.clone(), invoker, config.retry));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            executor,
            Arc::new(config.stage_catalog()),
            config.qualification,
        ));
        let coordinator = Arc::new(BatchCoordinator::new(
            orchestrator,
            pool.clone(),
            Arc::new(PlainTextExtractor),
            store.clone(),
            config.batch,
        ));
        Self {
            batches: Arc::new(BatchRegistry::new(config.batch.retention)),
            config: Arc::new(config),
            coordinator,
            pool,
            store,
        }
    }
}
