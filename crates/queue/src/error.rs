//! Queue error model.

use manifold_core::MessageId;
use thiserror::Error;

/// Failure of a queue operation.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The referenced message does not exist (already deleted, or never
    /// enqueued on this queue).
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// Payload could not be (de)serialized.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing-store failure (connection, SQL, pool).
    #[error("queue storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl QueueError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}
