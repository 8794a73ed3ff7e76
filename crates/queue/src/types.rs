//! Queue envelope and metrics types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use manifold_core::MessageId;

/// Delivery envelope around a dispatched payload.
///
/// `message_id` is queue-assigned and distinct from any id inside the
/// payload; the same message keeps its id across redeliveries while
/// `read_count` grows by one per lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage<T> {
    pub message_id: MessageId,
    pub payload: T,
    pub enqueued_at: DateTime<Utc>,
    /// Number of times this message has been leased, this delivery included.
    pub read_count: u32,
    /// Instant after which the message becomes re-deliverable.
    pub visible_at: DateTime<Utc>,
}

/// Best-effort queue depth and age observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Live (non-archived) messages, visible or leased.
    pub queue_length: u64,
    pub oldest_message_age_seconds: Option<i64>,
    pub newest_message_age_seconds: Option<i64>,
    /// All messages ever still present, archived included.
    pub total_messages: u64,
}
