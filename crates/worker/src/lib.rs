//! `manifold-worker` — admission and the polling extraction worker.
//!
//! ## Components
//!
//! - [`JobStore`]: durable job state with conditional status transitions
//!   (in-memory and Postgres implementations)
//! - [`PatternStore`]: read access to approved patterns
//! - [`AdmissionService`] / [`IdempotencyGuard`]: validate, dedupe, persist,
//!   dispatch
//! - [`Worker`]: lease-driven processing loop with persist-then-delete
//!   settlement and a bounded delivery budget
//! - [`WorkerSettings`]: environment-driven configuration for the binary

pub mod admission;
pub mod config;
pub mod patterns;
pub mod store;
pub mod worker;

pub use admission::{
    AdmissionError, AdmissionOutcome, AdmissionService, IdempotencyCheck, IdempotencyFailPolicy,
    IdempotencyGuard, JobRequest,
};
pub use config::WorkerSettings;
pub use patterns::{InMemoryPatternStore, PatternStore, PatternStoreError, PostgresPatternStore};
pub use store::{
    IdempotencyRecord, InMemoryJobStore, JobStore, JobStoreError, PostgresJobStore,
    TransitionOutcome,
};
pub use worker::{Worker, WorkerConfig, WorkerStats};
