//! `manifold-queue` — durable at-least-once work queue.
//!
//! ## Design
//!
//! - Messages carry a visibility timeout: a lease hides a message from every
//!   other consumer until `visible_at`; a message neither deleted nor
//!   archived by then becomes re-deliverable (at-least-once delivery)
//! - `read_count` increments per lease and is the consumer's signal for
//!   "exhausted deliveries, archive instead of re-lease"
//! - Deletion is terminal (successful processing); archival moves a message
//!   to a dead-letter area where it stays inspectable but is never
//!   auto-redelivered
//! - Lease is atomic per message: two consumers always lease disjoint sets
//!
//! ## Components
//!
//! - [`WorkQueue`]: the queue contract (enqueue / lease / delete / archive /
//!   metrics)
//! - [`QueueMessage`]: the delivery envelope
//! - [`InMemoryWorkQueue`]: in-process implementation for tests/dev
//! - [`PostgresWorkQueue`]: durable implementation (`FOR UPDATE SKIP LOCKED`)

pub mod error;
pub mod in_memory;
pub mod postgres;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use manifold_core::MessageId;

pub use error::QueueError;
pub use in_memory::InMemoryWorkQueue;
pub use postgres::PostgresWorkQueue;
pub use types::{QueueMessage, QueueMetrics};

/// At-least-once delivery queue over one named queue.
#[async_trait]
pub trait WorkQueue<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Append a message. Failure here must fail the caller's unit of work:
    /// a job record without a dispatch message would never be processed.
    async fn enqueue(&self, payload: &T) -> Result<MessageId, QueueError>;

    /// Atomically claim up to `max_messages` currently-visible messages,
    /// hiding each until `now + visibility_timeout` and incrementing its
    /// `read_count`. Returns an empty vector when nothing is visible
    /// (non-blocking poll semantics).
    async fn lease(
        &self,
        visibility_timeout: Duration,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage<T>>, QueueError>;

    /// Permanently remove a message. Call only after the corresponding job
    /// state has been durably persisted (persist-then-delete ordering).
    async fn delete(&self, message_id: MessageId) -> Result<(), QueueError>;

    /// Move a message to the dead-letter area. It remains inspectable but is
    /// never redelivered.
    async fn archive(&self, message_id: MessageId) -> Result<(), QueueError>;

    /// Best-effort depth/age metrics. Callers must never fail their main
    /// path on a metrics error.
    async fn metrics(&self) -> Result<QueueMetrics, QueueError>;
}
