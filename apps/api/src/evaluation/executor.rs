//! Stage Executor: runs one stage to a validated result or a terminal failure.
//!
//! Per attempt: acquire a credential, invoke under the stage timeout, validate,
//! report the outcome to the pool. Transport-class failures rotate to another
//! credential; hard schema defects retry with a corrective note. Attempts are
//! spaced by exponential backoff with jitter.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::evaluation::credentials::{AttemptOutcome, CredentialPool};
use crate::evaluation::error::{Defect, StageError, StageFailed};
use crate::evaluation::invoker::{InvokeError, StageInvoker, StageRequest};
use crate::evaluation::stages::{StageKind, StageOutput, StageResult, StageSpec};
use crate::evaluation::validator::{validate, SchemaViolation};

/// Record of a single invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAttempt {
    pub stage: StageKind,
    pub credential_id: Option<String>,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    /// Raw model text; `None` when the transport failed.
    pub raw_output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): base·2^(retry−1) plus up to 50% jitter,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter_ceiling = backoff.as_millis() as u64 / 2;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        (backoff + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

pub struct StageExecutor {
    pool: Arc<CredentialPool>,
    invoker: Arc<dyn StageInvoker>,
    retry: RetryPolicy,
}

/// Running tally for one `run` call.
#[derive(Default)]
struct AttemptLog {
    attempts: Vec<StageAttempt>,
    transport_failures: u32,
    schema_failures: u32,
    last_defect: Option<Defect>,
}

impl AttemptLog {
    fn into_failure(self, stage: StageKind, defect: Defect, attempts_exhausted: bool) -> StageFailed {
        StageFailed {
            stage,
            defect,
            attempts_exhausted,
            transport_failures: self.transport_failures,
            schema_failures: self.schema_failures,
            attempts: self.attempts,
        }
    }
}

impl StageExecutor {
    pub fn new(pool: Arc<CredentialPool>, invoker: Arc<dyn StageInvoker>, retry: RetryPolicy) -> Self {
        Self {
            pool,
            invoker,
            retry,
        }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Runs `spec` with `context` until one attempt validates or the retry budget is spent.
    ///
    /// Cancellation is honoured before each attempt and during backoff; an attempt
    /// already in flight is allowed to finish.
    pub async fn run(
        &self,
        session_id: Uuid,
        spec: &StageSpec,
        context: &Value,
        cancel: &CancellationToken,
    ) -> Result<StageResult, StageError> {
        let stage = spec.kind;
        let mut log = AttemptLog::default();
        let mut correction: Option<String> = None;

        for attempt in 1..=spec.max_retries {
            if attempt > 1 {
                let delay = self.retry.delay_for(attempt - 1);
                warn!(
                    session_id = %session_id,
                    stage = %stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying stage after backoff"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(StageError::Cancelled(stage)),
                }
            }
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled(stage));
            }

            let credential = match self.pool.acquire() {
                Ok(credential) => credential,
                Err(exhausted) => {
                    warn!(session_id = %session_id, stage = %stage, "{exhausted}");
                    return Err(log.into_failure(stage, Defect::PoolExhausted, false).into());
                }
            };

            let request = StageRequest {
                stage,
                context,
                correction: correction.as_deref(),
            };
            debug!(
                session_id = %session_id,
                stage = %stage,
                credential = %credential.id,
                attempt,
                "Invoking stage"
            );
            let invoked = tokio::time::timeout(
                spec.timeout,
                self.invoker.invoke(&credential, &request, spec.timeout),
            )
            .await
            .unwrap_or(Err(InvokeError::Timeout));

            let raw = match invoked {
                Ok(raw) => raw,
                Err(error) => {
                    let outcome = error.outcome();
                    self.pool.report(&credential.id, outcome);
                    warn!(
                        session_id = %session_id,
                        stage = %stage,
                        credential = %credential.id,
                        attempt,
                        outcome = %outcome,
                        "Stage attempt failed in transport: {error}"
                    );
                    log.transport_failures += 1;
                    log.last_defect = Some(transport_defect(&error));
                    log.attempts.push(StageAttempt {
                        stage,
                        credential_id: Some(credential.id),
                        attempt,
                        outcome,
                        raw_output: None,
                    });
                    continue;
                }
            };

            match validate(spec.schema, &raw).and_then(|validated| {
                StageOutput::decode(stage, validated.value)
                    .map(|output| (output, validated.soft_defects))
                    .map_err(|error| SchemaViolation::undecodable(&error))
            }) {
                Ok((output, soft_defects)) => {
                    self.pool.report(&credential.id, AttemptOutcome::Success);
                    for defect in &soft_defects {
                        warn!(
                            session_id = %session_id,
                            stage = %stage,
                            field = defect.field(),
                            "Soft defect corrected: {defect:?}"
                        );
                    }
                    log.attempts.push(StageAttempt {
                        stage,
                        credential_id: Some(credential.id.clone()),
                        attempt,
                        outcome: AttemptOutcome::Success,
                        raw_output: Some(raw),
                    });
                    info!(session_id = %session_id, stage = %stage, attempt, "Stage succeeded");
                    return Ok(StageResult {
                        stage,
                        output,
                        soft_defects,
                        attempts: log.attempts,
                        credential_id: credential.id,
                        produced_at: Utc::now(),
                    });
                }
                Err(violation) => {
                    self.pool.report(&credential.id, AttemptOutcome::SchemaInvalid);
                    warn!(
                        session_id = %session_id,
                        stage = %stage,
                        attempt,
                        fields = ?violation.field_names(),
                        "Stage output rejected"
                    );
                    log.schema_failures += 1;
                    log.last_defect = Some(Defect::from(&violation));
                    correction = Some(violation.correction_note());
                    log.attempts.push(StageAttempt {
                        stage,
                        credential_id: Some(credential.id),
                        attempt,
                        outcome: AttemptOutcome::SchemaInvalid,
                        raw_output: Some(raw),
                    });
                }
            }
        }

        let defect = log.last_defect.clone().unwrap_or(Defect::TransportError);
        warn!(
            session_id = %session_id,
            stage = %stage,
            transport_failures = log.transport_failures,
            schema_failures = log.schema_failures,
            "Stage retry budget exhausted"
        );
        Err(log.into_failure(stage, defect, true).into())
    }
}

fn transport_defect(error: &InvokeError) -> Defect {
    match error {
        InvokeError::Timeout => Defect::Timeout,
        InvokeError::RateLimited => Defect::RateLimited,
        InvokeError::Unauthorized { .. } => Defect::CredentialRejected,
        InvokeError::Transport(_) => Defect::TransportError,
    }
}
