use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::content::{ContentAccepted, ContentError, CreateContentRequest};
use crate::models::job::resolve_lang;
use crate::models::prediction::Prediction;
use crate::services::producer::ProducerError;

type ApiError = (StatusCode, Json<ContentError>);

fn api_error(
    status: StatusCode,
    message: &str,
    content_id: Option<Uuid>,
    detail: Option<String>,
) -> ApiError {
    (
        status,
        Json(ContentError {
            message: message.to_string(),
            content_id,
            detail,
        }),
    )
}

fn enqueue_error(content_id: Uuid, err: ProducerError) -> ApiError {
    let status = match err {
        ProducerError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ProducerError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProducerError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, "Queue enqueue failed", Some(content_id), Some(err.to_string()))
}

/// POST /api/v1/content — Store content and queue it for moderation.
///
/// The content row is kept when the enqueue fails; the 503 response carries
/// its id so the caller can re-enqueue it later.
pub async fn create_content(
    State(state): State<AppState>,
    Json(request): Json<CreateContentRequest>,
) -> Result<(StatusCode, Json<ContentAccepted>), ApiError> {
    request.validate().map_err(|report| {
        api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Invalid content request",
            None,
            Some(report.to_string()),
        )
    })?;

    let lang = resolve_lang(request.lang.as_deref());
    let content = queries::create_content(&state.db, &request.org_id, &request.text, &lang)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Content insert failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "DB insert failed",
                None,
                Some(e.to_string()),
            )
        })?;

    let handle = state
        .producer
        .enqueue(&content.id.to_string(), &content.text, Some(&content.lang))
        .await
        .map_err(|e| enqueue_error(content.id, e))?;

    Ok((
        StatusCode::CREATED,
        Json(ContentAccepted {
            id: content.id,
            job_id: handle.job_id,
        }),
    ))
}

/// POST /api/v1/content/{id}/moderation — Re-enqueue moderation for stored content.
pub async fn reenqueue_moderation(
    State(state): State<AppState>,
    Path(content_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ContentAccepted>), ApiError> {
    let content = queries::get_content(&state.db, content_id)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "DB lookup failed",
                Some(content_id),
                Some(e.to_string()),
            )
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Content not found", Some(content_id), None))?;

    let handle = state
        .producer
        .enqueue(&content.id.to_string(), &content.text, Some(&content.lang))
        .await
        .map_err(|e| enqueue_error(content.id, e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ContentAccepted {
            id: content.id,
            job_id: handle.job_id,
        }),
    ))
}

/// GET /api/v1/content/{id}/prediction — Fetch the stored moderation prediction.
pub async fn get_prediction(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
) -> Result<Json<Prediction>, StatusCode> {
    match state.store.get_prediction(&content_id).await {
        Ok(Some(prediction)) => Ok(Json(prediction)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(content_id = %content_id, error = %e, "Prediction lookup failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
