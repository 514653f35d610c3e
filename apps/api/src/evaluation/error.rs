use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluation::executor::StageAttempt;
use crate::evaluation::stages::StageKind;
use crate::evaluation::validator::SchemaViolation;

/// Why a stage or session could not proceed. Never carries transport payloads or secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Defect {
    UnreadableDocument,
    UnparseableOutput,
    SchemaInvalid { fields: Vec<String> },
    TransportError,
    Timeout,
    RateLimited,
    CredentialRejected,
    PoolExhausted,
    JobDescriptionUnanalyzable,
}

impl Defect {
    pub fn category(&self) -> &'static str {
        match self {
            Defect::UnreadableDocument => "UNREADABLE_DOCUMENT",
            Defect::UnparseableOutput => "UNPARSEABLE_OUTPUT",
            Defect::SchemaInvalid { .. } => "SCHEMA_INVALID",
            Defect::TransportError => "TRANSPORT_ERROR",
            Defect::Timeout => "TIMEOUT",
            Defect::RateLimited => "RATE_LIMITED",
            Defect::CredentialRejected => "CREDENTIAL_REJECTED",
            Defect::PoolExhausted => "POOL_EXHAUSTED",
            Defect::JobDescriptionUnanalyzable => "JOB_DESCRIPTION_UNANALYZABLE",
        }
    }
}

impl From<&SchemaViolation> for Defect {
    fn from(violation: &SchemaViolation) -> Self {
        if violation.is_unparseable() {
            Defect::UnparseableOutput
        } else {
            Defect::SchemaInvalid {
                fields: violation.field_names(),
            }
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Defect::UnreadableDocument => f.write_str("unreadable document"),
            Defect::UnparseableOutput => f.write_str("unparseable output"),
            Defect::SchemaInvalid { fields } => {
                write!(f, "missing or malformed fields: {}", fields.join(", "))
            }
            Defect::TransportError => f.write_str("analysis service unreachable"),
            Defect::Timeout => f.write_str("analysis service timed out"),
            Defect::RateLimited => f.write_str("analysis service rate limited"),
            Defect::CredentialRejected => f.write_str("credential rejected"),
            Defect::PoolExhausted => f.write_str("no credential available"),
            Defect::JobDescriptionUnanalyzable => f.write_str("job description unanalyzable"),
        }
    }
}

/// A stage spent its retry budget (or could not get a credential) without success.
#[derive(Debug, Clone, Error, Serialize)]
#[error("stage {stage} failed: {defect}")]
pub struct StageFailed {
    pub stage: StageKind,
    /// The defect of the last attempt.
    pub defect: Defect,
    pub attempts_exhausted: bool,
    pub transport_failures: u32,
    pub schema_failures: u32,
    pub attempts: Vec<StageAttempt>,
}

#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error(transparent)]
    Failed(#[from] StageFailed),

    #[error("stage {0} cancelled before completion")]
    Cancelled(StageKind),
}
