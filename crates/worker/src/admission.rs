//! Job admission: idempotency check, job creation, dispatch enqueue.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, instrument, warn};

use manifold_core::{DispatchPayload, DomainError, IdempotencyKey, Job, MessageId, PatternId};
use manifold_queue::{QueueError, WorkQueue};

use crate::store::{IdempotencyRecord, JobStore, JobStoreError};

/// What to do when the idempotency lookup itself fails.
///
/// Fail-open admits the request (risking one duplicate job, which the status
/// machine tolerates); fail-closed rejects it (risking a spurious admission
/// error). Duplicate work is cheaper than a hard failure here, so fail-open
/// is the default.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum IdempotencyFailPolicy {
    #[default]
    FailOpen,
    FailClosed,
}

/// Result of an idempotency lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyCheck {
    pub is_duplicate: bool,
    pub existing: Option<IdempotencyRecord>,
}

/// Admission failure.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Malformed request (bad idempotency key format).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Job store failure (insert, or fail-closed idempotency lookup).
    #[error(transparent)]
    Store(#[from] JobStoreError),

    /// The dispatch message could not be enqueued; the job was marked Failed.
    #[error("dispatch enqueue failed: {0}")]
    Enqueue(#[from] QueueError),
}

/// Checks a submitted idempotency key against prior jobs.
pub struct IdempotencyGuard<S> {
    store: Arc<S>,
    policy: IdempotencyFailPolicy,
}

impl<S: JobStore> IdempotencyGuard<S> {
    pub fn new(store: Arc<S>, policy: IdempotencyFailPolicy) -> Self {
        Self { store, policy }
    }

    /// Look up `key`. A storage failure is resolved by the fail policy.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn check(&self, key: &IdempotencyKey) -> Result<IdempotencyCheck, AdmissionError> {
        match self.store.find_by_idempotency_key(key).await {
            Ok(existing) => Ok(IdempotencyCheck {
                is_duplicate: existing.is_some(),
                existing,
            }),
            Err(e) => match self.policy {
                IdempotencyFailPolicy::FailOpen => {
                    warn!(error = %e, "idempotency lookup failed; admitting (fail-open)");
                    Ok(IdempotencyCheck {
                        is_duplicate: false,
                        existing: None,
                    })
                }
                IdempotencyFailPolicy::FailClosed => Err(AdmissionError::Store(e)),
            },
        }
    }
}

/// A job submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub pattern_id: PatternId,
    pub image_url: String,
    /// Raw client-supplied key; format-validated at admission.
    pub idempotency_key: Option<String>,
    pub extras: JsonValue,
}

impl JobRequest {
    pub fn new(pattern_id: PatternId, image_url: impl Into<String>) -> Self {
        Self {
            pattern_id,
            image_url: image_url.into(),
            idempotency_key: None,
            extras: JsonValue::Null,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_extras(mut self, extras: JsonValue) -> Self {
        self.extras = extras;
        self
    }
}

/// What admission decided.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    /// A new job was created and its dispatch message enqueued.
    Accepted { job: Job, message_id: MessageId },
    /// The idempotency key was seen before; no new work was created.
    Duplicate(IdempotencyRecord),
}

/// The admission path: validate, dedupe, persist, dispatch.
pub struct AdmissionService<S, Q> {
    jobs: Arc<S>,
    queue: Arc<Q>,
    guard: IdempotencyGuard<S>,
}

impl<S, Q> AdmissionService<S, Q>
where
    S: JobStore,
    Q: WorkQueue<DispatchPayload>,
{
    pub fn new(jobs: Arc<S>, queue: Arc<Q>, policy: IdempotencyFailPolicy) -> Self {
        let guard = IdempotencyGuard::new(Arc::clone(&jobs), policy);
        Self { jobs, queue, guard }
    }

    /// Admit a submission.
    ///
    /// The job record is persisted before the dispatch message is enqueued;
    /// if the enqueue fails the job is marked Failed in place rather than
    /// left Queued forever.
    #[instrument(skip(self, request), fields(pattern_id = %request.pattern_id), err)]
    pub async fn submit(&self, request: JobRequest) -> Result<AdmissionOutcome, AdmissionError> {
        let key = request
            .idempotency_key
            .map(IdempotencyKey::new)
            .transpose()?;

        if let Some(key) = &key {
            let check = self.guard.check(key).await?;
            if let Some(existing) = check.existing {
                return Ok(AdmissionOutcome::Duplicate(existing));
            }
        }

        let mut job = Job::new(request.pattern_id, request.image_url).with_extras(request.extras);
        if let Some(key) = key {
            job = job.with_idempotency_key(key);
        }
        self.jobs.insert(&job).await?;

        let payload = DispatchPayload::for_job(&job);
        match self.queue.enqueue(&payload).await {
            Ok(message_id) => Ok(AdmissionOutcome::Accepted { job, message_id }),
            Err(e) => {
                // A Queued job without a dispatch message would never run.
                if let Err(store_err) = self
                    .jobs
                    .complete_failed(job.id, &format!("dispatch enqueue failed: {}", e))
                    .await
                {
                    error!(job_id = %job.id, error = %store_err, "failed to mark job failed after enqueue error");
                }
                Err(AdmissionError::Enqueue(e))
            }
        }
    }
}
