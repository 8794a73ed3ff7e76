//! The polling extraction worker.
//!
//! ## Delivery handling
//!
//! Every leased message goes through the same funnel:
//!
//! 1. load the job; a terminal job means this is a redelivery after a crash
//!    between persist and delete — delete the message and move on
//! 2. conditional `Queued -> Running`; a skip means another worker owns the
//!    job right now — leave the message alone
//! 3. orchestrate the extraction
//! 4. settle: success and non-transient failures persist a terminal status
//!    *before* the message is deleted (persist-then-delete, so a crash can
//!    only cause redelivery of settled work, never lost work); transient
//!    failures requeue the job and leave the message to lease expiry, unless
//!    the delivery budget is spent, in which case the job fails and the
//!    message is archived for inspection
//!
//! Queue-level redelivery is independent of the orchestrator's in-process
//! retry budget; `max_deliveries` bounds the total number of attempts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use manifold_core::DispatchPayload;
use manifold_inference::{InferenceOrchestrator, InferenceProvider};
use manifold_queue::{QueueMessage, WorkQueue};

use crate::patterns::PatternStore;
use crate::store::{JobStore, TransitionOutcome};

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls that found nothing.
    pub poll_interval: Duration,
    /// Lease length per delivery; must exceed the provider request timeout.
    pub visibility_timeout: Duration,
    /// Messages claimed per poll.
    pub batch_size: u32,
    /// Deliveries after which a still-failing message is archived.
    pub max_deliveries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(90),
            batch_size: 10,
            max_deliveries: 5,
        }
    }
}

/// Worker runtime counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub messages_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub messages_archived: u64,
    pub redeliveries_settled: u64,
}

/// Polls the work queue and drives jobs to a terminal state.
pub struct Worker<S, P, Q, I> {
    jobs: Arc<S>,
    patterns: Arc<P>,
    queue: Arc<Q>,
    orchestrator: Arc<InferenceOrchestrator<I>>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S, P, Q, I> Worker<S, P, Q, I>
where
    S: JobStore,
    P: PatternStore,
    Q: WorkQueue<DispatchPayload>,
    I: InferenceProvider,
{
    pub fn new(
        jobs: Arc<S>,
        patterns: Arc<P>,
        queue: Arc<Q>,
        orchestrator: Arc<InferenceOrchestrator<I>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            patterns,
            queue,
            orchestrator,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap().clone()
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("extraction worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let processed = self.process_batch().await;
            if processed > 0 {
                continue;
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("extraction worker stopped");
    }

    /// Lease one batch and process every message in it. Returns the number
    /// of messages handled; queue errors are logged and count as zero.
    pub async fn process_batch(&self) -> usize {
        let leased = match self
            .queue
            .lease(self.config.visibility_timeout, self.config.batch_size)
            .await
        {
            Ok(leased) => leased,
            Err(e) => {
                error!(error = %e, "queue lease failed");
                return 0;
            }
        };

        let count = leased.len();
        for message in leased {
            self.process_message(message).await;
            self.stats.lock().unwrap().messages_processed += 1;
        }
        count
    }

    #[instrument(skip(self, message), fields(job_id = %message.payload.job_id, read_count = message.read_count))]
    async fn process_message(&self, message: QueueMessage<DispatchPayload>) {
        let job_id = message.payload.job_id;

        let job = match self.jobs.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("dispatch message references unknown job; deleting");
                self.delete_message(&message).await;
                return;
            }
            Err(e) => {
                error!(error = %e, "job lookup failed; leaving message for redelivery");
                return;
            }
        };

        // Crash between persist and delete shows up as redelivery of a
        // settled job.
        if job.status.is_terminal() {
            debug!(status = %job.status, "redelivery of settled job; deleting message");
            self.delete_message(&message).await;
            self.stats.lock().unwrap().redeliveries_settled += 1;
            return;
        }

        match self.jobs.begin_running(job_id).await {
            Ok(TransitionOutcome::Applied(_)) => {}
            Ok(TransitionOutcome::Skipped { actual }) => {
                debug!(status = %actual, "job claimed elsewhere; skipping");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to claim job; leaving message for redelivery");
                return;
            }
        }

        let pattern = match self.patterns.get(job.pattern_id).await {
            Ok(Some(pattern)) => pattern,
            Ok(None) => {
                self.settle_failed(&message, &format!("pattern not found: {}", job.pattern_id))
                    .await;
                return;
            }
            Err(e) => {
                error!(error = %e, "pattern lookup failed");
                self.leave_or_archive(&message, &format!("pattern lookup failed: {}", e))
                    .await;
                return;
            }
        };

        match self
            .orchestrator
            .extract(&pattern, &message.payload.image_url)
            .await
        {
            Ok(outcome) => {
                match self
                    .jobs
                    .complete_succeeded(job_id, &outcome.manifest, outcome.latency_ms)
                    .await
                {
                    Ok(TransitionOutcome::Applied(_)) => {
                        self.delete_message(&message).await;
                        self.stats.lock().unwrap().jobs_succeeded += 1;
                    }
                    Ok(TransitionOutcome::Skipped { actual }) => {
                        warn!(status = %actual, "job settled concurrently; deleting message");
                        self.delete_message(&message).await;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to persist success; leaving message for redelivery");
                        self.requeue_job(job_id).await;
                    }
                }
            }
            Err(e) if e.is_transient() => {
                debug!(error = %e, "transient extraction failure");
                self.leave_or_archive(&message, &e.to_string()).await;
            }
            Err(e) => {
                self.settle_failed(&message, &e.to_string()).await;
            }
        }
    }

    /// Persist a terminal failure, then delete the message.
    async fn settle_failed(&self, message: &QueueMessage<DispatchPayload>, reason: &str) {
        let job_id = message.payload.job_id;
        match self.jobs.complete_failed(job_id, reason).await {
            Ok(TransitionOutcome::Applied(_)) => {
                info!(error = reason, "job failed");
                self.delete_message(message).await;
                self.stats.lock().unwrap().jobs_failed += 1;
            }
            Ok(TransitionOutcome::Skipped { actual }) => {
                warn!(status = %actual, "job settled concurrently; deleting message");
                self.delete_message(message).await;
            }
            Err(e) => {
                error!(error = %e, "failed to persist failure; leaving message for redelivery");
                self.requeue_job(job_id).await;
            }
        }
    }

    /// Transient-failure path: hand the message back to the queue via lease
    /// expiry, or fail-and-archive once the delivery budget is spent.
    async fn leave_or_archive(&self, message: &QueueMessage<DispatchPayload>, reason: &str) {
        let job_id = message.payload.job_id;

        if message.read_count >= self.config.max_deliveries {
            let final_reason = format!(
                "delivery budget exhausted after {} deliveries; last error: {}",
                message.read_count, reason
            );
            match self.jobs.complete_failed(job_id, &final_reason).await {
                Ok(_) => {
                    warn!(error = reason, deliveries = message.read_count, "archiving message");
                    if let Err(e) = self.queue.archive(message.message_id).await {
                        error!(error = %e, message_id = %message.message_id, "archive failed");
                        return;
                    }
                    let mut stats = self.stats.lock().unwrap();
                    stats.jobs_failed += 1;
                    stats.messages_archived += 1;
                }
                Err(e) => {
                    error!(error = %e, "failed to persist failure; leaving message for redelivery");
                    self.requeue_job(job_id).await;
                }
            }
            return;
        }

        debug!(
            deliveries = message.read_count,
            "leaving message for queue-level redelivery"
        );
        self.requeue_job(job_id).await;
    }

    /// Conditional `Running -> Queued` so a later delivery can claim the job
    /// again. Failure is logged; the lease expiry still governs redelivery.
    async fn requeue_job(&self, job_id: manifold_core::JobId) {
        if let Err(e) = self.jobs.requeue(job_id).await {
            error!(error = %e, job_id = %job_id, "failed to requeue job");
        }
    }

    async fn delete_message(&self, message: &QueueMessage<DispatchPayload>) {
        if let Err(e) = self.queue.delete(message.message_id).await {
            // The job state is already durable; at worst this redelivers a
            // settled job, which step 1 of the funnel absorbs.
            error!(error = %e, message_id = %message.message_id, "message delete failed");
        }
    }
}
