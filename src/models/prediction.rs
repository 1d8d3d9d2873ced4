use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open set of label scores returned by the classifier.
pub type Scores = BTreeMap<String, f64>;

/// Output of one classifier call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub model: String,
    pub top_label: String,
    pub scores: Scores,
}

/// A prediction ready to be written, keyed by `content_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub content_id: String,
    pub model_name: String,
    pub top_label: String,
    pub scores: Scores,
}

impl NewPrediction {
    pub fn from_classification(content_id: impl Into<String>, classification: Classification) -> Self {
        Self {
            content_id: content_id.into(),
            model_name: classification.model,
            top_label: classification.top_label,
            scores: classification.scores,
        }
    }
}

/// A persisted moderation prediction. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub content_id: String,
    pub model_name: String,
    pub top_label: String,
    pub scores: Scores,
    pub created_at: DateTime<Utc>,
}
