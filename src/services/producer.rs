use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::JobPayload;
use crate::services::queue::{Broker, QueueError};

/// Identifies a published moderation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub content_id: String,
}

/// Publishes moderation jobs for newly created content.
///
/// One publish attempt per call; retrying a failed enqueue is the caller's
/// decision.
#[derive(Clone)]
pub struct JobProducer {
    broker: Arc<dyn Broker>,
}

impl JobProducer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn enqueue(
        &self,
        content_id: &str,
        text: &str,
        lang: Option<&str>,
    ) -> Result<JobHandle, ProducerError> {
        if content_id.trim().is_empty() {
            return Err(ProducerError::InvalidInput("contentId must not be empty"));
        }
        if text.is_empty() {
            return Err(ProducerError::InvalidInput("text must not be empty"));
        }

        let payload = JobPayload::new(content_id, text, lang);
        let body = serde_json::to_value(&payload).map_err(ProducerError::Encode)?;

        let job_id = self.broker.publish(body).await.map_err(|e| {
            tracing::error!(content_id = %content_id, error = %e, "Failed to enqueue moderation job");
            ProducerError::BrokerUnavailable(e)
        })?;

        metrics::counter!("moderation_jobs_enqueued_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            content_id = %content_id,
            lang = %payload.lang,
            "Enqueued moderation job"
        );

        Ok(JobHandle {
            job_id,
            content_id: payload.content_id,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Invalid enqueue request: {0}")]
    InvalidInput(&'static str),

    #[error("Failed to encode job payload: {0}")]
    Encode(serde_json::Error),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::queue::{MemoryBroker, RedisBroker, RetryPolicy};
    use std::time::Duration;

    fn memory_producer() -> (Arc<MemoryBroker>, JobProducer) {
        let broker = Arc::new(MemoryBroker::new(RetryPolicy::default()));
        let producer = JobProducer::new(broker.clone());
        (broker, producer)
    }

    #[tokio::test]
    async fn test_enqueue_resolves_default_lang() {
        let (broker, producer) = memory_producer();

        let handle = producer.enqueue("c1", "hello", None).await.unwrap();
        assert_eq!(handle.content_id, "c1");

        let job = broker.get(handle.job_id).await.unwrap().unwrap();
        assert_eq!(job.attempt, 0);
        assert_eq!(
            job.payload,
            serde_json::json!({"contentId": "c1", "text": "hello", "lang": "en"})
        );
    }

    #[tokio::test]
    async fn test_enqueue_keeps_explicit_lang() {
        let (broker, producer) = memory_producer();
        let handle = producer.enqueue("c1", "bonjour", Some("fr")).await.unwrap();
        let job = broker.get(handle.job_id).await.unwrap().unwrap();
        assert_eq!(job.decode_payload().unwrap().lang, "fr");
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_input() {
        let (broker, producer) = memory_producer();
        assert!(matches!(
            producer.enqueue("", "hello", None).await,
            Err(ProducerError::InvalidInput(_))
        ));
        assert!(matches!(
            producer.enqueue("c1", "", None).await,
            Err(ProducerError::InvalidInput(_))
        ));
        assert_eq!(broker.depth().await.unwrap().queued, 0);
    }

    #[test]
    fn test_encode_error_is_not_a_broker_error() {
        let err = ProducerError::Encode(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert!(!matches!(err, ProducerError::BrokerUnavailable(_)));
        assert!(err.to_string().starts_with("Failed to encode job payload"));
    }

    #[tokio::test]
    async fn test_enqueue_reports_unreachable_broker() {
        let broker = RedisBroker::new("redis://127.0.0.1:1", "test", RetryPolicy::default()).unwrap();
        let producer = JobProducer::new(Arc::new(broker));

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            producer.enqueue("c1", "hello", None),
        )
        .await
        .expect("enqueue should fail fast");

        assert!(matches!(result, Err(ProducerError::BrokerUnavailable(_))));
    }
}
