//! Job requirements cache: the Job Requirements stage runs once per job description.
//!
//! Concurrent sessions asking for the same description share one in-flight
//! computation; every waiter receives the same result or the same failure.
//! The computation runs on its own task under a token owned by the slot, so a
//! cancelled batch only stops it when no other waiter is left.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::evaluation::error::{StageError, StageFailed};
use crate::evaluation::stages::StageResult;

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Error)]
pub enum RequirementsError {
    #[error(transparent)]
    Failed(Arc<StageFailed>),

    #[error("job requirements analysis was cancelled")]
    Cancelled,

    #[error("job requirements analysis aborted: {0}")]
    Aborted(String),
}

type Settled = Result<Arc<StageResult>, RequirementsError>;

struct Flight {
    computation: Shared<BoxFuture<'static, Settled>>,
    cancel: CancellationToken,
    waiters: usize,
}

#[derive(Default)]
struct SlotState {
    flight: Option<Flight>,
    generation: u64,
}

#[derive(Default)]
pub struct RequirementsSlot {
    state: Mutex<SlotState>,
    computations: AtomicUsize,
}

impl fmt::Debug for RequirementsSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequirementsSlot")
            .field("computations", &self.computations.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RequirementsSlot {
    /// Returns the shared result, starting `compute` only when nothing usable is
    /// in flight or settled. `compute` receives the slot's own token, which is
    /// cancelled once every waiter has given up.
    ///
    /// Cancelling `cancel` releases this caller only. A caller whose token is
    /// still live never observes another caller's cancellation.
    pub async fn get_or_compute<F, Fut>(&self, cancel: &CancellationToken, compute: F) -> Settled
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<StageResult, StageError>> + Send + 'static,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(RequirementsError::Cancelled);
            }
            let (generation, computation) = self.join(&compute);
            let settled = tokio::select! {
                settled = computation => settled,
                _ = cancel.cancelled() => {
                    self.leave(generation);
                    return Err(RequirementsError::Cancelled);
                }
            };
            self.leave(generation);
            match settled {
                Err(RequirementsError::Cancelled) if !cancel.is_cancelled() => {
                    debug!("Restarting job requirements analysis abandoned by other waiters");
                    self.discard(generation);
                }
                settled => return settled,
            }
        }
    }

    /// Registers a waiter on the current flight, starting a new one if there is
    /// none or the current one was abandoned.
    fn join<F, Fut>(&self, compute: &F) -> (u64, Shared<BoxFuture<'static, Settled>>)
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<StageResult, StageError>> + Send + 'static,
    {
        let mut state = self.lock();
        let reusable = state
            .flight
            .as_ref()
            .is_some_and(|flight| !flight.cancel.is_cancelled());
        if !reusable {
            state.flight = None;
            state.generation += 1;
        }
        let generation = state.generation;
        let flight = state.flight.get_or_insert_with(|| self.start(compute));
        flight.waiters += 1;
        (generation, flight.computation.clone())
    }

    fn start<F, Fut>(&self, compute: &F) -> Flight
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<StageResult, StageError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(compute(cancel.clone()));
        let computation = async move {
            match task.await {
                Ok(Ok(result)) => Ok(Arc::new(result)),
                Ok(Err(StageError::Failed(failed))) => {
                    Err(RequirementsError::Failed(Arc::new(failed)))
                }
                Ok(Err(StageError::Cancelled(_))) => Err(RequirementsError::Cancelled),
                Err(join_error) => Err(RequirementsError::Aborted(join_error.to_string())),
            }
        }
        .boxed()
        .shared();
        self.computations.fetch_add(1, Ordering::SeqCst);
        Flight {
            computation,
            cancel,
            waiters: 0,
        }
    }

    fn leave(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        let Some(flight) = state.flight.as_mut() else {
            return;
        };
        flight.waiters = flight.waiters.saturating_sub(1);
        if flight.waiters == 0 && flight.computation.peek().is_none() {
            debug!("Every waiter left; cancelling job requirements analysis");
            flight.cancel.cancel();
        }
    }

    fn discard(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.flight = None;
        }
    }

    #[cfg(test)]
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    fn settled_with_error(&self) -> bool {
        self.lock()
            .flight
            .as_ref()
            .and_then(|flight| flight.computation.peek())
            .is_some_and(Result::is_err)
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct CacheEntry {
    slot: Arc<RequirementsSlot>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

/// Slots keyed by the exact job description text, holding at most `capacity`
/// descriptions. The least recently requested one is dropped first.
pub struct JobRequirementsCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl Default for JobRequirementsCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl JobRequirementsCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Slot for `job_description`. A slot whose computation failed is replaced
    /// so the next batch gets a fresh attempt.
    pub fn slot_for(&self, job_description: &str) -> Arc<RequirementsSlot> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.clock += 1;
        let now = state.clock;

        let stale = state
            .entries
            .get(job_description)
            .is_some_and(|entry| entry.slot.settled_with_error());
        if stale {
            debug!("Discarding failed job requirements entry");
            state.entries.remove(job_description);
        }
        if let Some(entry) = state.entries.get_mut(job_description) {
            entry.last_used = now;
            return entry.slot.clone();
        }

        if state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                debug!(capacity = self.capacity, "Evicting least recently used job requirements entry");
                state.entries.remove(&oldest);
            }
        }
        let slot = Arc::new(RequirementsSlot::default());
        state.entries.insert(
            job_description.to_string(),
            CacheEntry {
                slot: slot.clone(),
                last_used: now,
            },
        );
        slot
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }
}
