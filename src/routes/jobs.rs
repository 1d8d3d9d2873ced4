use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::Job;

const MAX_DEAD_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct DeadJobsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/v1/jobs/{id} — Inspect a moderation job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, StatusCode> {
    match state.broker.get(job_id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Job lookup failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// GET /api/v1/jobs/dead — List dead jobs, most recent first.
pub async fn list_dead_jobs(
    State(state): State<AppState>,
    Query(query): Query<DeadJobsQuery>,
) -> Result<Json<Vec<Job>>, StatusCode> {
    state
        .broker
        .dead_jobs(query.limit.min(MAX_DEAD_LIMIT))
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "Dead job listing failed");
            StatusCode::SERVICE_UNAVAILABLE
        })
}
