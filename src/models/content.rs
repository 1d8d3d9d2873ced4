use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to create a content record and queue it for moderation.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentRequest {
    #[garde(length(min = 1, max = 200))]
    pub org_id: String,

    #[garde(length(min = 1, max = 20_000))]
    pub text: String,

    /// Blank or absent means the default language.
    #[garde(length(max = 16))]
    pub lang: Option<String>,
}

/// A stored content record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub id: Uuid,
    pub org_id: String,
    pub text: String,
    pub lang: String,
    pub created_at: DateTime<Utc>,
}

/// Response after content creation or re-enqueue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAccepted {
    pub id: Uuid,
    pub job_id: Uuid,
}

/// Error body for content endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
