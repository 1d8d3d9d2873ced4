use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Broker, QueueError, RetryPolicy};
use crate::models::job::{
    Delivery, Failure, FailureReason, Job, JobState, Lease, NackOutcome, QueueDepth,
};

/// In-process broker with the same state machine as [`super::RedisBroker`].
///
/// Not durable: jobs live only as long as the process. Timing uses the tokio
/// clock, so tests can drive lease expiry and backoff with paused time.
pub struct MemoryBroker {
    policy: RetryPolicy,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Entry>,
    queued: VecDeque<Uuid>,
    dead: Vec<Uuid>,
}

struct Entry {
    job: Job,
    available_at: Instant,
    lease: Option<HeldLease>,
}

struct HeldLease {
    token: Uuid,
    deadline: Instant,
}

impl MemoryBroker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Inner {
    fn held_mut(&mut self, lease: &Lease) -> Result<&mut Entry, QueueError> {
        match self.jobs.get_mut(&lease.job_id) {
            Some(entry)
                if entry.job.state == JobState::InFlight
                    && entry.lease.as_ref().map(|l| l.token) == Some(lease.token) =>
            {
                Ok(entry)
            }
            _ => Err(QueueError::LeaseLost(lease.job_id)),
        }
    }

    fn fail(&mut self, job_id: Uuid, failure: &Failure, policy: &RetryPolicy) -> NackOutcome {
        let now = Instant::now();
        let Some(entry) = self.jobs.get_mut(&job_id) else {
            return NackOutcome::Dead { attempt: 0 };
        };
        entry.lease = None;
        entry.job.attempt += 1;
        entry.job.last_error = Some(failure.describe());
        entry.job.updated_at = Utc::now();

        let outcome = policy.resolve(entry.job.attempt, failure.is_permanent());
        match outcome {
            NackOutcome::Dead { .. } => {
                entry.job.state = JobState::Dead;
                self.dead.push(job_id);
            }
            NackOutcome::Requeued { delay, .. } => {
                entry.job.state = JobState::Queued;
                entry.available_at = now + delay;
                self.queued.push_back(job_id);
            }
        }
        outcome
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let job = Job {
            id,
            payload,
            attempt: 0,
            state: JobState::Queued,
            created_at: now,
            updated_at: now,
            last_error: None,
        };
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(
            id,
            Entry {
                job,
                available_at: Instant::now(),
                lease: None,
            },
        );
        inner.queued.push_back(id);
        Ok(id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let position = inner.queued.iter().position(|id| {
            inner
                .jobs
                .get(id)
                .is_some_and(|e| e.job.state == JobState::Queued && e.available_at <= now)
        });
        let Some(position) = position else {
            return Ok(None);
        };
        let Some(job_id) = inner.queued.remove(position) else {
            return Ok(None);
        };
        let Some(entry) = inner.jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        let token = Uuid::new_v4();
        entry.job.state = JobState::InFlight;
        entry.job.updated_at = Utc::now();
        entry.lease = Some(HeldLease {
            token,
            deadline: now + lease,
        });

        let expires_at = Utc::now()
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(Some(Delivery {
            job: entry.job.clone(),
            lease: Lease {
                job_id,
                worker_id: worker_id.to_string(),
                token,
                expires_at,
            },
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.held_mut(lease)?;
        entry.lease = None;
        entry.job.state = JobState::Completed;
        entry.job.updated_at = Utc::now();
        Ok(())
    }

    async fn nack(&self, lease: &Lease, failure: &Failure) -> Result<NackOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.held_mut(lease)?;
        Ok(inner.fail(lease.job_id, failure, &self.policy))
    }

    async fn release(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.held_mut(lease)?;
        entry.lease = None;
        entry.job.state = JobState::Queued;
        entry.job.updated_at = Utc::now();
        entry.available_at = Instant::now();
        inner.queued.push_front(lease.job_id);
        Ok(())
    }

    async fn lease_valid(&self, lease: &Lease) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.held_mut(lease) {
            Ok(entry) => entry
                .lease
                .as_ref()
                .is_some_and(|held| held.deadline > Instant::now()),
            Err(_) => false,
        })
    }

    async fn sweep_expired(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let expired: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|e| {
                e.job.state == JobState::InFlight
                    && e.lease.as_ref().is_some_and(|held| held.deadline <= now)
            })
            .map(|e| e.job.id)
            .collect();

        let failure = Failure::new(FailureReason::LeaseExpired, "");
        for job_id in &expired {
            let outcome = inner.fail(*job_id, &failure, &self.policy);
            tracing::warn!(job_id = %job_id, outcome = ?outcome, "Lease expired without ack");
        }
        Ok(expired.len())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&job_id).map(|e| e.job.clone()))
    }

    async fn dead_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .dead
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.jobs.get(id).map(|e| e.job.clone()))
            .collect())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let inner = self.inner.lock().await;
        let mut depth = QueueDepth::default();
        for entry in inner.jobs.values() {
            match entry.job.state {
                JobState::Queued => depth.queued += 1,
                JobState::InFlight => depth.in_flight += 1,
                JobState::Dead => depth.dead += 1,
                JobState::Completed => {}
            }
        }
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
