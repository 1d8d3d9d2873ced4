//! Worker pool: concurrent consumers that claim moderation jobs, classify the
//! text, persist the prediction and resolve the job with the broker.
//!
//! A job is acked only after its prediction write has been confirmed. Any
//! crash before that point leaves the lease to expire, and the redelivered job
//! is absorbed by the store's insert-if-absent write.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::db::ResultStore;
use crate::models::job::{Delivery, Failure, FailureReason, Lease, NackOutcome};
use crate::models::prediction::NewPrediction;
use crate::services::classifier::{Classifier, ClassifierError};
use crate::services::queue::{Broker, QueueError};

/// Idle polling backs off up to this multiple of the poll interval.
const MAX_IDLE_MULTIPLIER: u32 = 8;

/// Floor for poll and sweep periods; a zero period would spin or panic.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Must exceed `classifier_timeout + store_timeout`.
    pub lease: Duration,
    pub classifier_timeout: Duration,
    pub store_timeout: Duration,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease: Duration::from_secs(30),
            classifier_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// How a single delivery was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Prediction durable and job acked. `inserted` is false when a previous
    /// delivery had already written it.
    Completed { inserted: bool },
    Requeued { attempt: u32, delay: Duration },
    Dead { attempt: u32, reason: FailureReason },
    /// The lease was lost before the job could be resolved; the broker has
    /// redelivered or will redeliver it.
    Abandoned,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Classifier rejected the service credential; worker pool halted")]
    Unauthorized,

    #[error("Broker error: {0}")]
    Broker(#[from] QueueError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn ResultStore>,
    config: WorkerConfig,
    pool_id: String,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn Broker>,
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn ResultStore>,
        config: WorkerConfig,
    ) -> Self {
        let pool_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            broker,
            classifier,
            store,
            config,
            pool_id,
        }
    }

    /// Run consumers and the lease reaper until `shutdown` is cancelled.
    ///
    /// Returns `WorkerError::Unauthorized` if the classifier rejected the
    /// credential; every consumer is stopped in that case.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let halt = shutdown.child_token();
        let mut tasks = JoinSet::new();

        for index in 0..self.config.concurrency.max(1) {
            let pool = self.clone();
            let token = halt.clone();
            let worker_id = format!("worker-{}-{}", self.pool_id, index);
            tasks.spawn(async move { pool.consume(worker_id, token).await });
        }
        {
            let pool = self.clone();
            let token = halt.clone();
            tasks.spawn(async move { pool.reap(token).await });
        }

        tracing::info!(
            pool_id = %self.pool_id,
            concurrency = self.config.concurrency,
            lease_ms = self.config.lease.as_millis() as u64,
            "Worker pool started"
        );

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let failed = match joined {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(WorkerError::Join(e)),
            };
            if let Some(e) = failed {
                tracing::error!(error = %e, "Worker task stopped with error, halting pool");
                halt.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        tracing::info!(pool_id = %self.pool_id, "Worker pool stopped");
        result
    }

    async fn consume(&self, worker_id: String, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let poll_interval = self.config.poll_interval.max(MIN_PERIOD);
        let max_idle = poll_interval * MAX_IDLE_MULTIPLIER;
        let mut idle = poll_interval;

        while !shutdown.is_cancelled() {
            match self.process_next(&worker_id).await {
                Ok(Some(_)) => {
                    idle = poll_interval;
                    continue;
                }
                Ok(None) => {
                    tracing::trace!(worker_id = %worker_id, "No jobs available, sleeping");
                }
                Err(WorkerError::Unauthorized) => return Err(WorkerError::Unauthorized),
                Err(e) => {
                    tracing::error!(worker_id = %worker_id, error = %e, "Error processing job, will retry");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(idle) => {}
            }
            idle = (idle * 2).min(max_idle);
        }

        tracing::debug!(worker_id = %worker_id, "Consumer stopped");
        Ok(())
    }

    async fn reap(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let mut ticker = tokio::time::interval(self.config.sweep_interval.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.broker.sweep_expired().await {
                Ok(0) => {}
                Ok(swept) => tracing::info!(swept, "Requeued jobs with expired leases"),
                Err(e) => tracing::warn!(error = %e, "Lease sweep failed"),
            }
            if let Ok(depth) = self.broker.depth().await {
                metrics::gauge!("moderation_queue_depth").set(depth.queued as f64);
            }
        }
        Ok(())
    }

    /// Claim one job and process it. `Ok(None)` when nothing was available.
    pub async fn process_next(&self, worker_id: &str) -> Result<Option<JobOutcome>, WorkerError> {
        match self.broker.claim(worker_id, self.config.lease).await? {
            Some(delivery) => self.process(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Classify, persist and resolve one claimed job.
    pub async fn process(&self, delivery: Delivery) -> Result<JobOutcome, WorkerError> {
        let Delivery { job, lease } = delivery;
        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            worker_id = %lease.worker_id,
            attempt = job.attempt,
            lease_expires_at = %lease.expires_at
        );

        async move {
            let payload = match job.decode_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    return self
                        .fail(&lease, Failure::new(FailureReason::InvalidPayload, e.to_string()))
                        .await
                }
            };
            tracing::info!(content_id = %payload.content_id, lang = %payload.lang, "Processing moderation job");

            let started = Instant::now();
            let classified = timeout(
                self.config.classifier_timeout,
                self.classifier.classify(&payload.text, &payload.lang),
            )
            .await;
            metrics::histogram!("moderation_classify_seconds").record(started.elapsed().as_secs_f64());

            let classification = match classified {
                Ok(Ok(classification)) => classification,
                Ok(Err(ClassifierError::Unauthorized)) => {
                    tracing::error!("Classifier rejected the service credential, releasing job");
                    if let Err(e) = self.broker.release(&lease).await {
                        tracing::warn!(error = %e, "Failed to release job, lease will expire");
                    }
                    return Err(WorkerError::Unauthorized);
                }
                Ok(Err(e)) => return self.fail(&lease, classifier_failure(&e)).await,
                Err(_) => {
                    let detail = format!("no response within {:?}", self.config.classifier_timeout);
                    return self
                        .fail(&lease, Failure::new(FailureReason::ClassifierTimeout, detail))
                        .await;
                }
            };

            // A redelivered copy may already be running elsewhere.
            if !self.broker.lease_valid(&lease).await? {
                metrics::counter!("moderation_jobs_abandoned_total").increment(1);
                tracing::warn!("Lease no longer held, abandoning job before store write");
                return Ok(JobOutcome::Abandoned);
            }

            let prediction = NewPrediction::from_classification(&payload.content_id, classification);
            let inserted = match timeout(
                self.config.store_timeout,
                self.store.insert_prediction_if_absent(&prediction),
            )
            .await
            {
                Ok(Ok(inserted)) => inserted,
                Ok(Err(e)) => {
                    return self
                        .fail(&lease, Failure::new(FailureReason::StoreError, e.to_string()))
                        .await
                }
                Err(_) => {
                    let detail = format!("no response within {:?}", self.config.store_timeout);
                    return self
                        .fail(&lease, Failure::new(FailureReason::StoreTimeout, detail))
                        .await;
                }
            };

            match self.broker.ack(&lease).await {
                Ok(()) => {}
                Err(QueueError::LeaseLost(_)) => {
                    metrics::counter!("moderation_jobs_abandoned_total").increment(1);
                    tracing::warn!(
                        inserted,
                        "Prediction stored but lease lost before ack, redelivery will be a no-op"
                    );
                    return Ok(JobOutcome::Abandoned);
                }
                Err(e) => return Err(e.into()),
            }

            metrics::counter!("moderation_jobs_completed_total").increment(1);
            tracing::info!(
                content_id = %payload.content_id,
                top_label = %prediction.top_label,
                model = %prediction.model_name,
                inserted,
                "Job completed"
            );
            Ok(JobOutcome::Completed { inserted })
        }
        .instrument(span)
        .await
    }

    async fn fail(&self, lease: &Lease, failure: Failure) -> Result<JobOutcome, WorkerError> {
        let outcome = match self.broker.nack(lease, &failure).await {
            Ok(outcome) => outcome,
            Err(QueueError::LeaseLost(_)) => {
                metrics::counter!("moderation_jobs_abandoned_total").increment(1);
                tracing::warn!(reason = %failure.reason, "Lease lost before nack");
                return Ok(JobOutcome::Abandoned);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(match outcome {
            NackOutcome::Requeued { attempt, delay } => {
                metrics::counter!("moderation_jobs_retried_total").increment(1);
                tracing::warn!(
                    reason = %failure.reason,
                    detail = %failure.detail,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Job failed, scheduled for redelivery"
                );
                JobOutcome::Requeued { attempt, delay }
            }
            NackOutcome::Dead { attempt } => {
                metrics::counter!("moderation_jobs_dead_total").increment(1);
                tracing::error!(
                    reason = %failure.reason,
                    detail = %failure.detail,
                    attempt,
                    permanent = failure.is_permanent(),
                    "Job moved to dead state"
                );
                JobOutcome::Dead {
                    attempt,
                    reason: failure.reason,
                }
            }
        })
    }
}

fn classifier_failure(err: &ClassifierError) -> Failure {
    let reason = match err {
        ClassifierError::Timeout => FailureReason::ClassifierTimeout,
        ClassifierError::InvalidResponse(_) => FailureReason::ClassifierInvalidResponse,
        ClassifierError::Rejected(_) => FailureReason::ClassifierRejected,
        ClassifierError::ServiceUnavailable(_)
        | ClassifierError::Client(_)
        | ClassifierError::Unauthorized => FailureReason::ClassifierUnavailable,
    };
    Failure::new(reason, err.to_string())
}
