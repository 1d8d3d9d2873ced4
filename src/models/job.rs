use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_LANG: &str = "en";

/// State of a moderation job inside the broker.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobState {
    Queued,
    InFlight,
    Completed,
    Dead,
}

/// Wire payload of a moderation job: `{ "contentId", "text", "lang" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    #[garde(length(min = 1, max = 128))]
    pub content_id: String,

    #[garde(skip)]
    pub text: String,

    #[serde(default = "default_lang")]
    #[garde(length(min = 1, max = 16))]
    pub lang: String,
}

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

/// Resolve an optional language code, falling back to `"en"` when absent or blank.
pub fn resolve_lang(lang: Option<&str>) -> String {
    match lang.map(str::trim) {
        Some(l) if !l.is_empty() => l.to_string(),
        _ => default_lang(),
    }
}

impl JobPayload {
    /// Build a fully resolved payload; a missing or blank `lang` becomes `"en"`.
    pub fn new(content_id: impl Into<String>, text: impl Into<String>, lang: Option<&str>) -> Self {
        Self {
            content_id: content_id.into(),
            text: text.into(),
            lang: resolve_lang(lang),
        }
    }

    /// Decode and validate a raw payload taken off the broker.
    pub fn decode(raw: &serde_json::Value) -> Result<Self, PayloadError> {
        let mut payload: JobPayload = serde_json::from_value(raw.clone())?;
        if payload.lang.trim().is_empty() {
            payload.lang = default_lang();
        }
        if payload.content_id.trim().is_empty() {
            return Err(PayloadError::Invalid("contentId is blank".to_string()));
        }
        payload
            .validate()
            .map_err(|report| PayloadError::Invalid(report.to_string()))?;
        Ok(payload)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid job payload: {0}")]
    Invalid(String),
}

/// A moderation job as tracked by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Raw payload as published; decoded by the worker.
    pub payload: serde_json::Value,
    /// Failed deliveries so far.
    pub attempt: u32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn decode_payload(&self) -> Result<JobPayload, PayloadError> {
        JobPayload::decode(&self.payload)
    }
}

/// Proof of ownership of an in-flight job. Stale leases are rejected by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: Uuid,
    pub worker_id: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A claimed job together with the lease that must be presented to resolve it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: Job,
    pub lease: Lease,
}

/// Reason code attached to a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum FailureReason {
    InvalidPayload,
    ClassifierRejected,
    ClassifierTimeout,
    ClassifierUnavailable,
    ClassifierInvalidResponse,
    StoreError,
    StoreTimeout,
    LeaseExpired,
}

impl FailureReason {
    /// Permanent failures go straight to `dead` without consuming retries.
    pub fn is_permanent(self) -> bool {
        matches!(self, Self::InvalidPayload | Self::ClassifierRejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub reason: FailureReason,
    pub detail: String,
}

impl Failure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.reason.is_permanent()
    }

    /// `reason: detail`, as recorded in `Job::last_error`.
    pub fn describe(&self) -> String {
        if self.detail.is_empty() {
            self.reason.to_string()
        } else {
            format!("{}: {}", self.reason, self.detail)
        }
    }
}

/// What the broker did with a nacked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued { attempt: u32, delay: Duration },
    Dead { attempt: u32 },
}

/// Job counts per non-terminal state, plus retained dead jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub queued: u64,
    pub in_flight: u64,
    pub dead: u64,
}
