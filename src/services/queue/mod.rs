//! Job broker abstraction.
//!
//! The broker owns every job for its whole lifetime and all state-transition
//! and retry bookkeeping. Workers borrow jobs through a [`Lease`]; any
//! resolution (`ack`, `nack`, `release`) presenting a lease that is no longer
//! current fails with [`QueueError::LeaseLost`].

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Delivery, Failure, Job, Lease, NackOutcome, QueueDepth};
use crate::services::backoff::BackoffPolicy;

pub mod memory;
pub mod redis;

pub use memory::MemoryBroker;
pub use self::redis::RedisBroker;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a new job in `queued` state, available immediately.
    async fn publish(&self, payload: serde_json::Value) -> Result<Uuid, QueueError>;

    /// Atomically move one available job to `in-flight` under a new lease.
    async fn claim(&self, worker_id: &str, lease: Duration)
        -> Result<Option<Delivery>, QueueError>;

    /// Mark the leased job `completed`.
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Count a failed delivery and either requeue the job after backoff or mark it dead.
    async fn nack(&self, lease: &Lease, failure: &Failure) -> Result<NackOutcome, QueueError>;

    /// Return the leased job to `queued` without counting an attempt.
    async fn release(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Whether the lease is still current and unexpired.
    async fn lease_valid(&self, lease: &Lease) -> Result<bool, QueueError>;

    /// Nack every in-flight job whose lease has elapsed with reason `lease-expired`.
    async fn sweep_expired(&self) -> Result<usize, QueueError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError>;

    /// Dead jobs, most recent first.
    async fn dead_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError>;

    async fn depth(&self) -> Result<QueueDepth, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Attempt ceiling and redelivery backoff applied by a broker on `nack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Decide the fate of a job that has now failed `attempt` times.
    pub fn resolve(&self, attempt: u32, permanent: bool) -> NackOutcome {
        if permanent || attempt >= self.max_attempts {
            NackOutcome::Dead { attempt }
        } else {
            NackOutcome::Requeued {
                attempt,
                delay: self.backoff.delay_for(attempt),
            }
        }
    }

    /// Redelivery delays in milliseconds for attempts `1..max_attempts`.
    pub fn delay_table_ms(&self) -> Vec<u64> {
        (1..self.max_attempts)
            .map(|attempt| self.backoff.delay_for(attempt).as_millis() as u64)
            .collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, BackoffPolicy::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Lease for job {0} is no longer held")]
    LeaseLost(Uuid),

    #[error("Corrupt job record {0}: {1}")]
    Corrupt(String, String),
}
