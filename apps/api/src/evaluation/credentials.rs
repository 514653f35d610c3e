//! Credential Pool: rotates interchangeable analysis-service credentials.
//!
//! Every stage attempt draws exactly one credential via [`CredentialPool::acquire`]
//! and hands the attempt's outcome back through [`CredentialPool::report`].
//! All pool state sits behind a single lock so status transitions are linearizable
//! across concurrent sessions. The pool never waits: when nothing is ACTIVE,
//! `acquire` fails immediately with [`PoolExhausted`].

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Status and outcome types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialStatus {
    Active,
    /// Cooling down; promoted back to ACTIVE by the next `acquire` after the cool-down.
    RateLimited,
    /// Too many consecutive failures. Unavailable until revived at a batch boundary.
    Exhausted,
    /// Authentication rejected. Never used again for the lifetime of the pool.
    Invalid,
}

/// Outcome of one stage attempt, as reported to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Success,
    SchemaInvalid,
    TransportError,
    RateLimited,
    Timeout,
    CredentialRejected,
}

impl AttemptOutcome {
    fn is_credential_failure(self) -> bool {
        matches!(
            self,
            AttemptOutcome::TransportError | AttemptOutcome::RateLimited | AttemptOutcome::Timeout
        )
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AttemptOutcome::Success => "SUCCESS",
            AttemptOutcome::SchemaInvalid => "SCHEMA_INVALID",
            AttemptOutcome::TransportError => "TRANSPORT_ERROR",
            AttemptOutcome::RateLimited => "RATE_LIMITED",
            AttemptOutcome::Timeout => "TIMEOUT",
            AttemptOutcome::CredentialRejected => "CREDENTIAL_REJECTED",
        };
        f.write_str(label)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Credentials
// ────────────────────────────────────────────────────────────────────────────

/// Secret token that never prints itself.
#[derive(Clone)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

/// A credential handed out for a single attempt.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    secret: SecretToken,
}

impl Credential {
    pub fn secret(&self) -> &str {
        self.secret.expose()
    }
}

/// Redacted, serializable view of one pool entry.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSnapshot {
    pub id: String,
    pub status: CredentialStatus,
    pub consecutive_failures: u32,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolPolicy {
    /// How long a RATE_LIMITED credential sits out before it is ACTIVE again.
    pub cooldown: Duration,
    /// Consecutive failures that move a credential to EXHAUSTED.
    pub failure_limit: u32,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            failure_limit: 3,
        }
    }
}

/// Transport failures in a row before a credential is cooled down.
const REPEATED_TRANSPORT_FAILURES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no ACTIVE credential available ({total} configured)")]
pub struct PoolExhausted {
    pub total: usize,
}

struct CredentialEntry {
    credential: Credential,
    status: CredentialStatus,
    consecutive_failures: u32,
    last_used: Option<Instant>,
    last_used_at: Option<DateTime<Utc>>,
    cooldown_until: Option<Instant>,
}

struct PoolState {
    entries: Vec<CredentialEntry>,
    reports: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// Pool
// ────────────────────────────────────────────────────────────────────────────

pub struct CredentialPool {
    policy: PoolPolicy,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Builds a pool from configured secrets. Ids are `key-1`, `key-2`, … in order.
    pub fn new(secrets: Vec<String>, policy: PoolPolicy) -> Self {
        let entries = secrets
            .into_iter()
            .enumerate()
            .map(|(i, secret)| CredentialEntry {
                credential: Credential {
                    id: format!("key-{}", i + 1),
                    secret: SecretToken::new(secret),
                },
                status: CredentialStatus::Active,
                consecutive_failures: 0,
                last_used: None,
                last_used_at: None,
                cooldown_until: None,
            })
            .collect::<Vec<_>>();

        info!("Credential pool initialized with {} credentials", entries.len());

        Self {
            policy,
            state: Mutex::new(PoolState {
                entries,
                reports: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Hands out the least-recently-used ACTIVE credential.
    pub fn acquire(&self) -> Result<Credential, PoolExhausted> {
        let now = Instant::now();
        let mut state = self.lock();
        promote_cooled_down(&mut state.entries, now);

        let total = state.entries.len();
        let chosen = state
            .entries
            .iter_mut()
            .enumerate()
            .filter(|(_, e)| e.status == CredentialStatus::Active)
            .min_by_key(|(i, e)| (e.last_used, *i))
            .map(|(_, e)| e)
            .ok_or(PoolExhausted { total })?;

        chosen.last_used = Some(now);
        chosen.last_used_at = Some(Utc::now());
        debug!(credential = %chosen.credential.id, "Credential acquired");
        Ok(chosen.credential.clone())
    }

    /// Applies an attempt outcome to the credential's status.
    ///
    /// SCHEMA_INVALID is neutral: the credential worked, the response did not.
    pub fn report(&self, credential_id: &str, outcome: AttemptOutcome) {
        let now = Instant::now();
        let policy = self.policy;
        let mut state = self.lock();
        state.reports += 1;

        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.credential.id == credential_id)
        else {
            warn!(credential = %credential_id, "Report for unknown credential ignored");
            return;
        };

        if entry.status == CredentialStatus::Invalid {
            return;
        }

        match outcome {
            AttemptOutcome::Success => {
                entry.consecutive_failures = 0;
                entry.status = CredentialStatus::Active;
                entry.cooldown_until = None;
            }
            AttemptOutcome::SchemaInvalid => {}
            AttemptOutcome::CredentialRejected => {
                entry.status = CredentialStatus::Invalid;
                entry.cooldown_until = None;
                warn!(credential = %credential_id, "Credential rejected; marked INVALID");
            }
            failure => {
                debug_assert!(failure.is_credential_failure());
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= policy.failure_limit {
                    entry.status = CredentialStatus::Exhausted;
                    entry.cooldown_until = None;
                    warn!(
                        credential = %credential_id,
                        failures = entry.consecutive_failures,
                        "Credential EXHAUSTED"
                    );
                } else if failure == AttemptOutcome::RateLimited
                    || entry.consecutive_failures >= REPEATED_TRANSPORT_FAILURES
                {
                    entry.status = CredentialStatus::RateLimited;
                    entry.cooldown_until = Some(now + policy.cooldown);
                    warn!(
                        credential = %credential_id,
                        outcome = %failure,
                        cooldown_secs = policy.cooldown.as_secs(),
                        "Credential cooling down"
                    );
                }
            }
        }
    }

    /// Brings EXHAUSTED credentials back to ACTIVE. INVALID ones stay out.
    /// Returns the number revived.
    pub fn revive_exhausted(&self) -> usize {
        let mut state = self.lock();
        let mut revived = 0;
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.status == CredentialStatus::Exhausted)
        {
            entry.status = CredentialStatus::Active;
            entry.consecutive_failures = 0;
            revived += 1;
        }
        if revived > 0 {
            info!("Revived {revived} exhausted credentials");
        }
        revived
    }

    pub fn active_count(&self) -> usize {
        let mut state = self.lock();
        promote_cooled_down(&mut state.entries, Instant::now());
        state
            .entries
            .iter()
            .filter(|e| e.status == CredentialStatus::Active)
            .count()
    }

    /// Total number of `report` calls the pool has processed.
    pub fn reports_recorded(&self) -> u64 {
        self.lock().reports
    }

    pub fn snapshot(&self) -> Vec<CredentialSnapshot> {
        let mut state = self.lock();
        promote_cooled_down(&mut state.entries, Instant::now());
        state
            .entries
            .iter()
            .map(|e| CredentialSnapshot {
                id: e.credential.id.clone(),
                status: e.status,
                consecutive_failures: e.consecutive_failures,
                last_used_at: e.last_used_at,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Pool state stays consistent even if a holder panicked mid-report.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn promote_cooled_down(entries: &mut [CredentialEntry], now: Instant) {
    for entry in entries.iter_mut() {
        if entry.status == CredentialStatus::RateLimited
            && entry.cooldown_until.map_or(true, |until| until <= now)
        {
            entry.status = CredentialStatus::Active;
            entry.cooldown_until = None;
            debug!(credential = %entry.credential.id, "Credential cool-down elapsed");
        }
    }
}
