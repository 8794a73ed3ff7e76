//! The extraction job entity and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{JobId, PatternId};
use crate::idempotency::IdempotencyKey;

/// Job execution status.
///
/// The only legal transitions are `Queued -> Running` and
/// `Running -> {Succeeded, Failed}` (plus `Queued -> Failed` when admission
/// cannot enqueue the dispatch message). Terminal states never transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

/// One unit of extraction work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub pattern_id: PatternId,
    pub image_url: String,
    pub status: JobStatus,
    /// Structured result, set exactly once on success.
    pub manifest: Option<JsonValue>,
    /// Human-readable failure message, set on the failed path.
    pub error: Option<String>,
    /// Provider round-trip latency for the successful attempt.
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on entering `Running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly once, on entering a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<IdempotencyKey>,
    /// Opaque caller-supplied bag passed through to the result.
    pub extras: JsonValue,
}

impl Job {
    pub fn new(pattern_id: PatternId, image_url: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            pattern_id,
            image_url: image_url.into(),
            status: JobStatus::Queued,
            manifest: None,
            error: None,
            latency_ms: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            idempotency_key: None,
            extras: JsonValue::Null,
        }
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn with_extras(mut self, extras: JsonValue) -> Self {
        self.extras = extras;
        self
    }

    /// Enter `Running`, stamping `started_at`.
    pub fn mark_running(&mut self) -> DomainResult<()> {
        if self.status != JobStatus::Queued {
            return Err(DomainError::invalid_transition(format!(
                "{} -> running",
                self.status
            )));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Enter `Succeeded` with the manifest and observed latency.
    pub fn mark_succeeded(&mut self, manifest: JsonValue, latency_ms: u64) -> DomainResult<()> {
        if self.status != JobStatus::Running {
            return Err(DomainError::invalid_transition(format!(
                "{} -> succeeded",
                self.status
            )));
        }
        self.status = JobStatus::Succeeded;
        self.manifest = Some(manifest);
        self.latency_ms = Some(latency_ms);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Enter `Failed` with a specific, user-facing message.
    ///
    /// Allowed from `Queued` as well as `Running`: admission fails a job in
    /// place when its dispatch message cannot be enqueued.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "{} -> failed",
                self.status
            )));
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// The queue payload dispatched at admission and consumed by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub job_id: JobId,
    pub pattern_id: PatternId,
    pub image_url: String,
    #[serde(default)]
    pub extras: JsonValue,
}

impl DispatchPayload {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            pattern_id: job.pattern_id,
            image_url: job.image_url.clone(),
            extras: job.extras.clone(),
        }
    }
}
