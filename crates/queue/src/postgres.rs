//! Postgres-backed work queue.
//!
//! One `queue_messages` table carries live and archived messages. Leasing is
//! a single `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP LOCKED)` statement,
//! so two workers polling concurrently always claim disjoint message sets.
//!
//! ## Error mapping
//!
//! Every sqlx failure maps to [`QueueError::Storage`] tagged with the
//! operation name; callers decide whether that fails their unit of work
//! (enqueue does, metrics never should).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;

use manifold_core::MessageId;

use crate::error::QueueError;
use crate::types::{QueueMessage, QueueMetrics};
use crate::WorkQueue;

/// Durable queue over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresWorkQueue {
    pool: Arc<PgPool>,
}

impl PostgresWorkQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the queue table and its lease index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                message_id  UUID PRIMARY KEY,
                payload     JSONB NOT NULL,
                status      TEXT NOT NULL DEFAULT 'ready',
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                read_count  INTEGER NOT NULL DEFAULT 0,
                visible_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_messages_ready
            ON queue_messages (visible_at, enqueued_at)
            WHERE status = 'ready'
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        Ok(())
    }
}

fn map_sqlx_error(operation: &'static str, e: sqlx::Error) -> QueueError {
    QueueError::storage(operation, e.to_string())
}

#[async_trait]
impl<T> WorkQueue<T> for PostgresWorkQueue
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[instrument(skip(self, payload), err)]
    async fn enqueue(&self, payload: &T) -> Result<MessageId, QueueError> {
        let message_id = MessageId::new();
        let body = serde_json::to_value(payload)?;

        sqlx::query(
            r#"
            INSERT INTO queue_messages (message_id, payload, status, enqueued_at, read_count, visible_at)
            VALUES ($1, $2, 'ready', now(), 0, now())
            "#,
        )
        .bind(message_id.as_uuid())
        .bind(&body)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        Ok(message_id)
    }

    #[instrument(skip(self), err)]
    async fn lease(
        &self,
        visibility_timeout: Duration,
        max_messages: u32,
    ) -> Result<Vec<QueueMessage<T>>, QueueError> {
        let hidden_until =
            Utc::now() + chrono::Duration::from_std(visibility_timeout).unwrap_or_default();

        let rows = sqlx::query(
            r#"
            WITH candidates AS (
                SELECT message_id
                FROM queue_messages
                WHERE status = 'ready' AND visible_at <= now()
                ORDER BY enqueued_at, message_id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_messages q
            SET read_count = q.read_count + 1,
                visible_at = $1
            FROM candidates c
            WHERE q.message_id = c.message_id
            RETURNING q.message_id, q.payload, q.enqueued_at, q.read_count, q.visible_at
            "#,
        )
        .bind(hidden_until)
        .bind(i64::from(max_messages))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("lease", e))?;

        let mut leased = Vec::with_capacity(rows.len());
        for row in rows {
            let message_id: uuid::Uuid = row
                .try_get("message_id")
                .map_err(|e| map_sqlx_error("lease", e))?;
            let payload: JsonValue = row
                .try_get("payload")
                .map_err(|e| map_sqlx_error("lease", e))?;
            let enqueued_at: DateTime<Utc> = row
                .try_get("enqueued_at")
                .map_err(|e| map_sqlx_error("lease", e))?;
            let read_count: i32 = row
                .try_get("read_count")
                .map_err(|e| map_sqlx_error("lease", e))?;
            let visible_at: DateTime<Utc> = row
                .try_get("visible_at")
                .map_err(|e| map_sqlx_error("lease", e))?;

            leased.push(QueueMessage {
                message_id: MessageId::from_uuid(message_id),
                payload: serde_json::from_value(payload)?,
                enqueued_at,
                read_count: read_count.max(0) as u32,
                visible_at,
            });
        }
        Ok(leased)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, message_id: MessageId) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE message_id = $1")
            .bind(message_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(message_id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn archive(&self, message_id: MessageId) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE queue_messages SET status = 'archived' WHERE message_id = $1",
        )
        .bind(message_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("archive", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(message_id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT
                count(*) FILTER (WHERE status = 'ready')                         AS queue_length,
                count(*)                                                         AS total_messages,
                min(enqueued_at) FILTER (WHERE status = 'ready')                 AS oldest,
                max(enqueued_at) FILTER (WHERE status = 'ready')                 AS newest
            FROM queue_messages
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("metrics", e))?;

        let queue_length: i64 = row
            .try_get("queue_length")
            .map_err(|e| map_sqlx_error("metrics", e))?;
        let total_messages: i64 = row
            .try_get("total_messages")
            .map_err(|e| map_sqlx_error("metrics", e))?;
        let oldest: Option<DateTime<Utc>> = row
            .try_get("oldest")
            .map_err(|e| map_sqlx_error("metrics", e))?;
        let newest: Option<DateTime<Utc>> = row
            .try_get("newest")
            .map_err(|e| map_sqlx_error("metrics", e))?;

        let now = Utc::now();
        Ok(QueueMetrics {
            queue_length: queue_length.max(0) as u64,
            oldest_message_age_seconds: oldest.map(|t| (now - t).num_seconds()),
            newest_message_age_seconds: newest.map(|t| (now - t).num_seconds()),
            total_messages: total_messages.max(0) as u64,
        })
    }
}
