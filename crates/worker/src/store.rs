//! Job storage with conditional status transitions.
//!
//! The store never exposes a blind "set status": every transition names the
//! states it is allowed from, and a transition attempted from any other state
//! is reported as [`TransitionOutcome::Skipped`] instead of applied. That is
//! the safety net for at-least-once delivery — a redelivered message can try
//! to re-run a job another worker already owns or settled, and the store
//! makes that attempt harmless.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;

use manifold_core::{IdempotencyKey, Job, JobId, JobStatus, PatternId};

/// Job store failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("job store {operation} failed: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("stored job is corrupt: {0}")]
    Corrupt(String),
}

impl JobStoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        JobStoreError::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// Result of a conditional transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The job was in an allowed state and the transition was applied.
    Applied(Job),
    /// The job was in some other state; nothing changed.
    Skipped { actual: JobStatus },
}

impl TransitionOutcome {
    pub fn was_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Read-only projection of the most recent job carrying an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub manifest: Option<JsonValue>,
}

/// Durable job state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly admitted job.
    async fn insert(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Conditional `Queued -> Running`. `started_at` is stamped on the first
    /// entry into Running and preserved across a later requeue.
    async fn begin_running(&self, job_id: JobId) -> Result<TransitionOutcome, JobStoreError>;

    /// Conditional `Running -> Queued`, used when a transient failure leaves
    /// the dispatch message to queue-level redelivery.
    async fn requeue(&self, job_id: JobId) -> Result<TransitionOutcome, JobStoreError>;

    /// Conditional `Running -> Succeeded` with the manifest and latency.
    async fn complete_succeeded(
        &self,
        job_id: JobId,
        manifest: &JsonValue,
        latency_ms: u64,
    ) -> Result<TransitionOutcome, JobStoreError>;

    /// Conditional `{Queued, Running} -> Failed` with a specific message.
    /// Allowed from Queued because admission fails a job in place when its
    /// dispatch message cannot be enqueued.
    async fn complete_failed(
        &self,
        job_id: JobId,
        error: &str,
    ) -> Result<TransitionOutcome, JobStoreError>;

    /// Most recent job carrying `key`, if any.
    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, JobStoreError>;
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn transition<F>(&self, job_id: JobId, apply: F) -> Result<TransitionOutcome, JobStoreError>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if apply(job) {
            Ok(TransitionOutcome::Applied(job.clone()))
        } else {
            Ok(TransitionOutcome::Skipped { actual: job.status })
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read().unwrap().get(&job_id).cloned())
    }

    async fn begin_running(&self, job_id: JobId) -> Result<TransitionOutcome, JobStoreError> {
        self.transition(job_id, |job| {
            if job.status != JobStatus::Queued {
                return false;
            }
            job.status = JobStatus::Running;
            job.started_at.get_or_insert_with(Utc::now);
            true
        })
    }

    async fn requeue(&self, job_id: JobId) -> Result<TransitionOutcome, JobStoreError> {
        self.transition(job_id, |job| {
            if job.status != JobStatus::Running {
                return false;
            }
            job.status = JobStatus::Queued;
            true
        })
    }

    async fn complete_succeeded(
        &self,
        job_id: JobId,
        manifest: &JsonValue,
        latency_ms: u64,
    ) -> Result<TransitionOutcome, JobStoreError> {
        let manifest = manifest.clone();
        self.transition(job_id, move |job| {
            job.mark_succeeded(manifest, latency_ms).is_ok()
        })
    }

    async fn complete_failed(
        &self,
        job_id: JobId,
        error: &str,
    ) -> Result<TransitionOutcome, JobStoreError> {
        self.transition(job_id, |job| job.mark_failed(error).is_ok())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let latest = jobs
            .values()
            .filter(|j| j.idempotency_key.as_ref() == Some(key))
            .max_by_key(|j| (j.created_at, j.id.as_uuid().to_owned()));
        Ok(latest.map(|j| IdempotencyRecord {
            job_id: j.id,
            status: j.status,
            manifest: j.manifest.clone(),
        }))
    }
}

/// Postgres-backed store. Conditional transitions are single
/// `UPDATE ... WHERE status = ...` statements, so concurrency control is the
/// database's row lock rather than anything in this process.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the jobs table and idempotency lookup index if absent.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id          UUID PRIMARY KEY,
                pattern_id      UUID NOT NULL,
                image_url       TEXT NOT NULL,
                status          TEXT NOT NULL,
                manifest        JSONB,
                error           TEXT,
                latency_ms      BIGINT,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
                started_at      TIMESTAMPTZ,
                completed_at    TIMESTAMPTZ,
                idempotency_key TEXT,
                extras          JSONB NOT NULL DEFAULT 'null'::jsonb
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_idempotency_key
            ON jobs (idempotency_key, created_at DESC)
            WHERE idempotency_key IS NOT NULL
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        Ok(())
    }

    async fn current_status(
        &self,
        job_id: JobId,
        operation: &'static str,
    ) -> Result<JobStatus, JobStoreError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .ok_or(JobStoreError::NotFound(job_id))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| map_sqlx_error(operation, e))?;
        status
            .parse()
            .map_err(|e| JobStoreError::Corrupt(format!("{}: {}", job_id, e)))
    }

    /// Run a conditional-UPDATE transition; when no row matched, distinguish
    /// "job missing" from "state disallowed".
    async fn conditional(
        &self,
        operation: &'static str,
        job_id: JobId,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<TransitionOutcome, JobStoreError> {
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(job_from_row(&row, operation)?)),
            None => {
                let actual = self.current_status(job_id, operation).await?;
                Ok(TransitionOutcome::Skipped { actual })
            }
        }
    }
}

const JOB_COLUMNS: &str = "job_id, pattern_id, image_url, status, manifest, error, \
                           latency_ms, created_at, started_at, completed_at, \
                           idempotency_key, extras";

fn map_sqlx_error(operation: &'static str, e: sqlx::Error) -> JobStoreError {
    JobStoreError::storage(operation, e.to_string())
}

fn job_from_row(row: &sqlx::postgres::PgRow, operation: &'static str) -> Result<Job, JobStoreError> {
    let job_id: uuid::Uuid = row
        .try_get("job_id")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let pattern_id: uuid::Uuid = row
        .try_get("pattern_id")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let image_url: String = row
        .try_get("image_url")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let manifest: Option<JsonValue> = row
        .try_get("manifest")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let error: Option<String> = row
        .try_get("error")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let latency_ms: Option<i64> = row
        .try_get("latency_ms")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let started_at: Option<DateTime<Utc>> = row
        .try_get("started_at")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let completed_at: Option<DateTime<Utc>> = row
        .try_get("completed_at")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let idempotency_key: Option<String> = row
        .try_get("idempotency_key")
        .map_err(|e| map_sqlx_error(operation, e))?;
    let extras: JsonValue = row
        .try_get("extras")
        .map_err(|e| map_sqlx_error(operation, e))?;

    let status: JobStatus = status
        .parse()
        .map_err(|e| JobStoreError::Corrupt(format!("{}: {}", job_id, e)))?;
    let idempotency_key = idempotency_key
        .map(IdempotencyKey::new)
        .transpose()
        .map_err(|e| JobStoreError::Corrupt(format!("{}: {}", job_id, e)))?;

    Ok(Job {
        id: JobId::from_uuid(job_id),
        pattern_id: PatternId::from_uuid(pattern_id),
        image_url,
        status,
        manifest,
        error,
        latency_ms: latency_ms.map(|v| v.max(0) as u64),
        created_at,
        started_at,
        completed_at,
        idempotency_key,
        extras,
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn insert(&self, job: &Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, pattern_id, image_url, status, manifest, error,
                              latency_ms, created_at, started_at, completed_at,
                              idempotency_key, extras)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.pattern_id.as_uuid())
        .bind(&job.image_url)
        .bind(job.status.as_str())
        .bind(&job.manifest)
        .bind(&job.error)
        .bind(job.latency_ms.map(|v| v as i64))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.idempotency_key.as_ref().map(|k| k.as_str()))
        .bind(&job.extras)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE job_id = $1", JOB_COLUMNS))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(|r| job_from_row(&r, "get")).transpose()
    }

    #[instrument(skip(self), err)]
    async fn begin_running(&self, job_id: JobId) -> Result<TransitionOutcome, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = COALESCE(started_at, now())
            WHERE job_id = $1 AND status = 'queued'
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let query = sqlx::query(&sql).bind(job_id.as_uuid());
        self.conditional("begin_running", job_id, query).await
    }

    #[instrument(skip(self), err)]
    async fn requeue(&self, job_id: JobId) -> Result<TransitionOutcome, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'queued'
            WHERE job_id = $1 AND status = 'running'
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let query = sqlx::query(&sql).bind(job_id.as_uuid());
        self.conditional("requeue", job_id, query).await
    }

    #[instrument(skip(self, manifest), err)]
    async fn complete_succeeded(
        &self,
        job_id: JobId,
        manifest: &JsonValue,
        latency_ms: u64,
    ) -> Result<TransitionOutcome, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'succeeded', manifest = $2, latency_ms = $3, completed_at = now()
            WHERE job_id = $1 AND status = 'running'
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let query = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .bind(manifest)
            .bind(latency_ms as i64);
        self.conditional("complete_succeeded", job_id, query).await
    }

    #[instrument(skip(self, error), err)]
    async fn complete_failed(
        &self,
        job_id: JobId,
        error: &str,
    ) -> Result<TransitionOutcome, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'failed', error = $2, completed_at = now()
            WHERE job_id = $1 AND status IN ('queued', 'running')
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let query = sqlx::query(&sql).bind(job_id.as_uuid()).bind(error);
        self.conditional("complete_failed", job_id, query).await
    }

    #[instrument(skip(self, key), err)]
    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, status, manifest
            FROM jobs
            WHERE idempotency_key = $1
            ORDER BY created_at DESC, job_id DESC
            LIMIT 1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let job_id: uuid::Uuid = row
            .try_get("job_id")
            .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;
        let manifest: Option<JsonValue> = row
            .try_get("manifest")
            .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;

        Ok(Some(IdempotencyRecord {
            job_id: JobId::from_uuid(job_id),
            status: status
                .parse()
                .map_err(|e| JobStoreError::Corrupt(format!("{}: {}", job_id, e)))?,
            manifest,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued_job() -> Job {
        Job::new(PatternId::new(), "https://img.example/receipt.png")
    }

    #[tokio::test]
    async fn begin_running_applies_only_from_queued() {
        let store = InMemoryJobStore::new();
        let job = queued_job();
        store.insert(&job).await.unwrap();

        let first = store.begin_running(job.id).await.unwrap();
        assert!(first.was_applied());

        // A second claim (double delivery) is a reported no-op.
        let second = store.begin_running(job.id).await.unwrap();
        assert_eq!(
            second,
            TransitionOutcome::Skipped {
                actual: JobStatus::Running
            }
        );
    }

    #[tokio::test]
    async fn requeue_preserves_started_at() {
        let store = InMemoryJobStore::new();
        let job = queued_job();
        store.insert(&job).await.unwrap();

        store.begin_running(job.id).await.unwrap();
        let started = store.get(job.id).await.unwrap().unwrap().started_at;
        assert!(started.is_some());

        assert!(store.requeue(job.id).await.unwrap().was_applied());
        store.begin_running(job.id).await.unwrap();
        assert_eq!(store.get(job.id).await.unwrap().unwrap().started_at, started);
    }

    #[tokio::test]
    async fn succeeded_requires_running() {
        let store = InMemoryJobStore::new();
        let job = queued_job();
        store.insert(&job).await.unwrap();

        let outcome = store
            .complete_succeeded(job.id, &json!({"x": 1}), 100)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Skipped {
                actual: JobStatus::Queued
            }
        );

        store.begin_running(job.id).await.unwrap();
        let outcome = store
            .complete_succeeded(job.id, &json!({"x": 1}), 100)
            .await
            .unwrap();
        assert!(outcome.was_applied());

        let settled = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(settled.status, JobStatus::Succeeded);
        assert_eq!(settled.manifest, Some(json!({"x": 1})));
        assert_eq!(settled.latency_ms, Some(100));
    }

    #[tokio::test]
    async fn failed_is_allowed_from_queued_and_running_only() {
        let store = InMemoryJobStore::new();
        let job = queued_job();
        store.insert(&job).await.unwrap();

        assert!(store
            .complete_failed(job.id, "enqueue failed")
            .await
            .unwrap()
            .was_applied());

        // Terminal now: nothing further applies.
        assert!(!store.begin_running(job.id).await.unwrap().was_applied());
        assert!(!store
            .complete_failed(job.id, "again")
            .await
            .unwrap()
            .was_applied());
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().error.as_deref(),
            Some("enqueue failed")
        );
    }

    #[tokio::test]
    async fn idempotency_lookup_returns_latest_snapshot() {
        let store = InMemoryJobStore::new();
        let key = IdempotencyKey::new("order-42").unwrap();

        assert!(store.find_by_idempotency_key(&key).await.unwrap().is_none());

        let job = queued_job().with_idempotency_key(key.clone());
        store.insert(&job).await.unwrap();
        store.begin_running(job.id).await.unwrap();
        store
            .complete_succeeded(job.id, &json!({"title": "Widget"}), 10)
            .await
            .unwrap();

        let record = store
            .find_by_idempotency_key(&key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.job_id, job.id);
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.manifest, Some(json!({"title": "Widget"})));
    }

    #[tokio::test]
    async fn transitions_on_unknown_job_are_not_found() {
        let store = InMemoryJobStore::new();
        let err = store.begin_running(JobId::new()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::NotFound(_)));
    }
}
