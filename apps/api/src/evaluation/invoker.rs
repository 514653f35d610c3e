//! Stage Invoker seam: one call to the external analysis service per attempt.
//!
//! `LlmClient` is the production implementation. Tests use a scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::evaluation::credentials::{AttemptOutcome, Credential};
use crate::evaluation::stages::StageKind;

/// Everything a stage call needs besides the credential.
#[derive(Debug, Clone)]
pub struct StageRequest<'a> {
    pub stage: StageKind,
    /// JSON object keyed by the stage's required inputs.
    pub context: &'a Value,
    /// Set on retries after a rejected response.
    pub correction: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("analysis call timed out")]
    Timeout,

    #[error("analysis service rate limited the credential")]
    RateLimited,

    #[error("analysis service rejected the credential (status {status})")]
    Unauthorized { status: u16 },

    #[error("transport failure: {0}")]
    Transport(String),
}

impl InvokeError {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            InvokeError::Timeout => AttemptOutcome::Timeout,
            InvokeError::RateLimited => AttemptOutcome::RateLimited,
            InvokeError::Unauthorized { .. } => AttemptOutcome::CredentialRejected,
            InvokeError::Transport(_) => AttemptOutcome::TransportError,
        }
    }
}

#[async_trait]
pub trait StageInvoker: Send + Sync {
    /// Returns the raw model text. Must give up by `timeout`.
    async fn invoke(
        &self,
        credential: &Credential,
        request: &StageRequest<'_>,
        timeout: Duration,
    ) -> Result<String, InvokeError>;
}
