//! `manifold-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the extraction job entity and its status machine, the
//! pattern/output-format model, and the idempotency-key value type.

pub mod error;
pub mod id;
pub mod idempotency;
pub mod job;
pub mod pattern;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, MessageId, PatternId};
pub use idempotency::IdempotencyKey;
pub use job::{DispatchPayload, Job, JobStatus};
pub use pattern::{OutputFormat, Pattern};
