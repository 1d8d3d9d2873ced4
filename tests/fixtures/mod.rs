//! Test fixtures for moderation pipeline tests

use moderation_pipeline::models::prediction::{Classification, Scores};
use serde_json::{json, Value};

/// Classifier reply used by the `c1` scenario.
pub fn non_toxic() -> Classification {
    Classification {
        model: "m".to_string(),
        top_label: "non-toxic".to_string(),
        scores: Scores::from([("non-toxic".to_string(), 0.9), ("toxic".to_string(), 0.1)]),
    }
}

pub fn toxic() -> Classification {
    Classification {
        model: "unitary/toxic-bert".to_string(),
        top_label: "toxic".to_string(),
        scores: Scores::from([("non-toxic".to_string(), 0.02), ("toxic".to_string(), 0.98)]),
    }
}

/// Payloads no worker can process.
pub fn poison_payloads() -> Vec<Value> {
    vec![
        json!({"contentId": "p1", "lang": "en"}),
        json!({"contentId": "", "text": "hello"}),
        json!({"contentId": "p3", "text": 7}),
        json!("not an object"),
    ]
}
