//! Candidate evaluation pipeline.
//!
//! Batch Coordinator → Pipeline Orchestrator → Stage Executor → (Stage Invoker,
//! Contract Validator), with every attempt drawing from the shared Credential Pool.

pub mod batch;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod invoker;
pub mod orchestrator;
pub mod prompts;
pub mod qualification;
pub mod requirements_cache;
pub mod session;
pub mod stages;
pub mod statistics;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;
