//! Test helpers: scripted classifier, flaky store and pool wiring

use async_trait::async_trait;
use moderation_pipeline::{
    db::{MemoryResultStore, ResultStore, StoreError},
    models::prediction::{Classification, NewPrediction, Prediction},
    services::{
        backoff::BackoffPolicy,
        classifier::{Classifier, ClassifierError},
        queue::{Broker, MemoryBroker, RetryPolicy},
        worker::{JobOutcome, WorkerConfig, WorkerPool},
    },
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const MAX_ATTEMPTS: u32 = 5;
pub const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// One scripted classifier reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Succeed(Classification),
    /// Respond after a delay.
    Slow(Duration, Classification),
    /// Never respond.
    Hang,
    Unavailable,
    Unauthorized,
    Rejected,
}

/// Classifier that replays scripted replies, then repeats `fallback`.
pub struct ScriptedClassifier {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(replies: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(reply: Reply) -> Self {
        Self::new(Vec::new(), reply)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _text: &str, _lang: &str) -> Result<Classification, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            Reply::Succeed(classification) => Ok(classification),
            Reply::Slow(delay, classification) => {
                tokio::time::sleep(delay).await;
                Ok(classification)
            }
            Reply::Hang => std::future::pending().await,
            Reply::Unavailable => Err(ClassifierError::ServiceUnavailable("status 503".into())),
            Reply::Unauthorized => Err(ClassifierError::Unauthorized),
            Reply::Rejected => Err(ClassifierError::Rejected("status 400".into())),
        }
    }
}

/// Store that fails its first `failures` writes, then behaves like the memory store.
pub struct FlakyStore {
    inner: MemoryResultStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryResultStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl ResultStore for FlakyStore {
    async fn insert_prediction_if_absent(
        &self,
        prediction: &NewPrediction,
    ) -> Result<bool, StoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.insert_prediction_if_absent(prediction).await
    }

    async fn get_prediction(&self, content_id: &str) -> Result<Option<Prediction>, StoreError> {
        self.inner.get_prediction(content_id).await
    }
}

pub fn retry_policy() -> RetryPolicy {
    RetryPolicy::new(
        MAX_ATTEMPTS,
        BackoffPolicy::new(Duration::from_secs(1), BACKOFF_CAP),
    )
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 4,
        lease: Duration::from_secs(30),
        classifier_timeout: Duration::from_secs(10),
        store_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(50),
        sweep_interval: Duration::from_secs(1),
    }
}

pub struct Harness<S: ResultStore + 'static> {
    pub broker: Arc<MemoryBroker>,
    pub classifier: Arc<ScriptedClassifier>,
    pub store: Arc<S>,
    pub pool: WorkerPool,
}

pub fn harness_with_store<S: ResultStore + 'static>(
    classifier: ScriptedClassifier,
    store: S,
    config: WorkerConfig,
) -> Harness<S> {
    let broker = Arc::new(MemoryBroker::new(retry_policy()));
    let classifier = Arc::new(classifier);
    let store = Arc::new(store);
    let pool = WorkerPool::new(broker.clone(), classifier.clone(), store.clone(), config);
    Harness {
        broker,
        classifier,
        store,
        pool,
    }
}

pub fn harness(classifier: ScriptedClassifier) -> Harness<MemoryResultStore> {
    harness_with_store(classifier, MemoryResultStore::new(), worker_config())
}

/// Process jobs with one worker until the broker has nothing queued or in flight,
/// advancing the paused clock past backoff delays as needed.
pub async fn drain<S: ResultStore + 'static>(harness: &Harness<S>) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    for _ in 0..100 {
        match harness.pool.process_next("w1").await.unwrap() {
            Some(outcome) => outcomes.push(outcome),
            None => {
                let depth = harness.broker.depth().await.unwrap();
                if depth.queued == 0 && depth.in_flight == 0 {
                    return outcomes;
                }
                tokio::time::advance(BACKOFF_CAP).await;
            }
        }
    }
    panic!("queue did not drain: {outcomes:?}");
}
