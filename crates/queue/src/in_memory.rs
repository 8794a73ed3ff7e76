//! In-memory work queue for tests and single-process development.
//!
//! Implements the full visibility-timeout contract, so worker logic
//! exercised against it behaves identically against the durable backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use manifold_core::MessageId;

use crate::error::QueueError;
use crate::types::{QueueMessage, QueueMetrics};
use crate::WorkQueue;

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: JsonValue,
    enqueued_at: DateTime<Utc>,
    read_count: u32,
    visible_at: DateTime<Utc>,
    archived: bool,
}

/// In-process queue with real lease semantics.
#[derive(Debug, Default)]
pub struct InMemoryWorkQueue {
    messages: Mutex<HashMap<MessageId, StoredMessage>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of archived (dead-lettered) messages.
    pub fn archived_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.archived)
            .count()
    }
}

#[async_trait]
impl<T> WorkQueue<T> for InMemoryWorkQueue
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn enqueue(&self, payload: &T) -> Result<MessageId, QueueError> {
        let message_id = MessageId::new();
        let now = Utc::now();
        let stored = StoredMessage {
            payload: serde_json::to_value(payload)?,
            enqueued_at: now,
            read_count: 0,
            visible_at: now,
            archived: false,
        };
        self.messages.lock().unwrap().insert(message_id, stored);
        Ok(message_id)
    }

    async fn lease(
        &self,
        visibility_timeout: Duration,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage<T>>, QueueError> {
        let now = Utc::now();
        let hidden_until =
            now + chrono::Duration::from_std(visibility_timeout).unwrap_or_default();

        let mut messages = self.messages.lock().unwrap();

        // Oldest-first, like the durable backend.
        let mut candidates: Vec<MessageId> = messages
            .iter()
            .filter(|(_, m)| !m.archived && m.visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        candidates.sort_by_key(|id| {
            let m = &messages[id];
            (m.enqueued_at, *id.as_uuid())
        });
        candidates.truncate(max_messages as usize);

        let mut leased = Vec::with_capacity(candidates.len());
        for id in candidates {
            let stored = messages.get_mut(&id).expect("candidate id present");
            stored.read_count += 1;
            stored.visible_at = hidden_until;
            let payload: T = serde_json::from_value(stored.payload.clone())?;
            leased.push(QueueMessage {
                message_id: id,
                payload,
                enqueued_at: stored.enqueued_at,
                read_count: stored.read_count,
                visible_at: stored.visible_at,
            });
        }
        Ok(leased)
    }

    async fn delete(&self, message_id: MessageId) -> Result<(), QueueError> {
        match self.messages.lock().unwrap().remove(&message_id) {
            Some(_) => Ok(()),
            None => Err(QueueError::NotFound(message_id)),
        }
    }

    async fn archive(&self, message_id: MessageId) -> Result<(), QueueError> {
        let mut messages = self.messages.lock().unwrap();
        match messages.get_mut(&message_id) {
            Some(stored) => {
                stored.archived = true;
                Ok(())
            }
            None => Err(QueueError::NotFound(message_id)),
        }
    }

    async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        let now = Utc::now();
        let messages = self.messages.lock().unwrap();

        let live: Vec<&StoredMessage> = messages.values().filter(|m| !m.archived).collect();
        let oldest = live.iter().map(|m| m.enqueued_at).min();
        let newest = live.iter().map(|m| m.enqueued_at).max();

        Ok(QueueMetrics {
            queue_length: live.len() as u64,
            oldest_message_age_seconds: oldest.map(|t| (now - t).num_seconds()),
            newest_message_age_seconds: newest.map(|t| (now - t).num_seconds()),
            total_messages: messages.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestPayload {
        job_id: String,
    }

    fn payload(id: &str) -> TestPayload {
        TestPayload {
            job_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn lease_hides_message_until_timeout() {
        let queue = InMemoryWorkQueue::new();
        queue.enqueue(&payload("J1")).await.unwrap();

        let first: Vec<QueueMessage<TestPayload>> =
            queue.lease(Duration::from_secs(60), 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].read_count, 1);
        assert_eq!(first[0].payload, payload("J1"));

        // Invisible while leased.
        let second: Vec<QueueMessage<TestPayload>> =
            queue.lease(Duration::from_secs(60), 1).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn expired_lease_redelivers_with_incremented_read_count() {
        let queue = InMemoryWorkQueue::new();
        queue.enqueue(&payload("J1")).await.unwrap();

        // Zero-duration visibility: the lease expires immediately.
        let first: Vec<QueueMessage<TestPayload>> =
            queue.lease(Duration::ZERO, 1).await.unwrap();
        assert_eq!(first[0].read_count, 1);

        let second: Vec<QueueMessage<TestPayload>> =
            queue.lease(Duration::ZERO, 1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].read_count, 2);
    }

    #[tokio::test]
    async fn delete_is_terminal() {
        let queue = InMemoryWorkQueue::new();
        let id = queue.enqueue(&payload("J1")).await.unwrap();

        WorkQueue::<TestPayload>::delete(&queue, id).await.unwrap();
        let leased: Vec<QueueMessage<TestPayload>> =
            queue.lease(Duration::ZERO, 10).await.unwrap();
        assert!(leased.is_empty());

        // Double delete reports the missing message.
        assert!(matches!(
            WorkQueue::<TestPayload>::delete(&queue, id).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn archived_message_is_never_redelivered_but_stays_counted() {
        let queue = InMemoryWorkQueue::new();
        let id = queue.enqueue(&payload("J1")).await.unwrap();

        WorkQueue::<TestPayload>::archive(&queue, id).await.unwrap();
        let leased: Vec<QueueMessage<TestPayload>> =
            queue.lease(Duration::ZERO, 10).await.unwrap();
        assert!(leased.is_empty());
        assert_eq!(queue.archived_count(), 1);

        let metrics = WorkQueue::<TestPayload>::metrics(&queue).await.unwrap();
        assert_eq!(metrics.queue_length, 0);
        assert_eq!(metrics.total_messages, 1);
    }

    #[tokio::test]
    async fn lease_respects_max_messages_and_is_oldest_first() {
        let queue = InMemoryWorkQueue::new();
        let first_id = queue.enqueue(&payload("J1")).await.unwrap();
        queue.enqueue(&payload("J2")).await.unwrap();
        queue.enqueue(&payload("J3")).await.unwrap();

        let leased: Vec<QueueMessage<TestPayload>> =
            queue.lease(Duration::from_secs(60), 2).await.unwrap();
        assert_eq!(leased.len(), 2);
        assert_eq!(leased[0].message_id, first_id);

        let rest: Vec<QueueMessage<TestPayload>> =
            queue.lease(Duration::from_secs(60), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload, payload("J3"));
    }

    #[tokio::test]
    async fn metrics_report_depth_and_ages() {
        let queue = InMemoryWorkQueue::new();
        let empty = WorkQueue::<TestPayload>::metrics(&queue).await.unwrap();
        assert_eq!(empty.queue_length, 0);
        assert!(empty.oldest_message_age_seconds.is_none());

        queue.enqueue(&payload("J1")).await.unwrap();
        queue.enqueue(&payload("J2")).await.unwrap();

        let metrics = WorkQueue::<TestPayload>::metrics(&queue).await.unwrap();
        assert_eq!(metrics.queue_length, 2);
        assert_eq!(metrics.total_messages, 2);
        assert!(metrics.oldest_message_age_seconds.unwrap() >= 0);
    }
}
