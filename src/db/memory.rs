use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ResultStore, StoreError};
use crate::models::prediction::{NewPrediction, Prediction};

/// In-process result store with the same insert-if-absent semantics as Postgres.
#[derive(Default)]
pub struct MemoryResultStore {
    rows: RwLock<HashMap<String, Prediction>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert_prediction_if_absent(
        &self,
        prediction: &NewPrediction,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&prediction.content_id) {
            return Ok(false);
        }
        rows.insert(
            prediction.content_id.clone(),
            Prediction {
                content_id: prediction.content_id.clone(),
                model_name: prediction.model_name.clone(),
                top_label: prediction.top_label.clone(),
                scores: prediction.scores.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn get_prediction(&self, content_id: &str) -> Result<Option<Prediction>, StoreError> {
        Ok(self.rows.read().await.get(content_id).cloned())
    }
}
