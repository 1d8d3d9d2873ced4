use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod content;
pub mod health;
pub mod jobs;
pub mod metrics;

/// API routes sharing [`AppState`]. Metrics and middleware are added by the binary.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/content", post(content::create_content))
        .route(
            "/api/v1/content/{id}/moderation",
            post(content::reenqueue_moderation),
        )
        .route(
            "/api/v1/content/{id}/prediction",
            get(content::get_prediction),
        )
        .route("/api/v1/jobs/dead", get(jobs::list_dead_jobs))
        .route("/api/v1/jobs/{id}", get(jobs::get_job))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryResultStore, ResultStore};
    use crate::models::job::{Failure, FailureReason};
    use crate::models::prediction::{NewPrediction, Scores};
    use crate::services::queue::{Broker, MemoryBroker, RetryPolicy};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> (Arc<MemoryBroker>, Arc<MemoryResultStore>, AppState) {
        let broker = Arc::new(MemoryBroker::new(RetryPolicy::default()));
        let store = Arc::new(MemoryResultStore::new());
        // Never connected: these tests only touch broker- and store-backed routes.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let state = AppState::new(pool, broker.clone(), store.clone());
        (broker, store, state)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_get_job_returns_snapshot() {
        let (broker, _, state) = test_state();
        let job_id = broker
            .publish(serde_json::json!({"contentId": "c1", "text": "hi", "lang": "en"}))
            .await
            .unwrap();

        let (status, body) = get_json(api_router(state), &format!("/api/v1/jobs/{job_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "queued");
        assert_eq!(body["attempt"], 0);
        assert_eq!(body["payload"]["contentId"], "c1");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (_, _, state) = test_state();
        let (status, _) = get_json(
            api_router(state),
            &format!("/api/v1/jobs/{}", uuid::Uuid::new_v4()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_prediction_lookup() {
        let (_, store, state) = test_state();
        store
            .insert_prediction_if_absent(&NewPrediction {
                content_id: "c1".to_string(),
                model_name: "m".to_string(),
                top_label: "non-toxic".to_string(),
                scores: Scores::from([("non-toxic".to_string(), 0.9)]),
            })
            .await
            .unwrap();

        let router = api_router(state);
        let (status, body) = get_json(router.clone(), "/api/v1/content/c1/prediction").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["topLabel"], "non-toxic");
        assert_eq!(body["modelName"], "m");

        let (status, _) = get_json(router, "/api/v1/content/c2/prediction").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn kill_poison_jobs(broker: &MemoryBroker, count: usize) {
        let failure = Failure::new(FailureReason::InvalidPayload, "missing text");
        for index in 0..count {
            broker
                .publish(serde_json::json!({"contentId": format!("p{index}")}))
                .await
                .unwrap();
            let delivery = broker
                .claim("w1", Duration::from_secs(30))
                .await
                .unwrap()
                .unwrap();
            broker.nack(&delivery.lease, &failure).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_dead_jobs_listing_returns_poison_job() {
        let (broker, _, state) = test_state();
        kill_poison_jobs(&broker, 1).await;

        let (status, body) = get_json(api_router(state), "/api/v1/jobs/dead").await;
        assert_eq!(status, StatusCode::OK);
        let jobs = body.as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["state"], "dead");
        assert_eq!(jobs[0]["attempt"], 1);
        assert_eq!(jobs[0]["payload"]["contentId"], "p0");
        assert!(jobs[0]["last_error"]
            .as_str()
            .unwrap()
            .starts_with("invalid-payload"));
    }

    #[tokio::test]
    async fn test_dead_jobs_limit_is_clamped() {
        let (broker, _, state) = test_state();
        kill_poison_jobs(&broker, 501).await;

        let router = api_router(state);
        let (status, body) = get_json(router.clone(), "/api/v1/jobs/dead?limit=1000").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 500);

        let (_, body) = get_json(router, "/api/v1/jobs/dead?limit=3").await;
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dead_jobs_listing_is_empty_initially() {
        let (_, _, state) = test_state();
        let (status, body) = get_json(api_router(state), "/api/v1/jobs/dead?limit=10").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
