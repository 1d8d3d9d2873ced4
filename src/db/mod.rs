use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::models::prediction::{NewPrediction, Prediction};

pub mod memory;
pub mod queries;

pub use memory::MemoryResultStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Durable home of moderation predictions.
///
/// Writes are insert-if-absent keyed by content id, so redelivered jobs never
/// produce a second row.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Returns `true` if a row was written, `false` if one already existed.
    async fn insert_prediction_if_absent(
        &self,
        prediction: &NewPrediction,
    ) -> Result<bool, StoreError>;

    async fn get_prediction(&self, content_id: &str) -> Result<Option<Prediction>, StoreError>;
}

/// PostgreSQL-backed result store sharing the process connection pool.
#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn insert_prediction_if_absent(
        &self,
        prediction: &NewPrediction,
    ) -> Result<bool, StoreError> {
        Ok(queries::insert_prediction_if_absent(&self.pool, prediction).await?)
    }

    async fn get_prediction(&self, content_id: &str) -> Result<Option<Prediction>, StoreError> {
        Ok(queries::get_prediction(&self.pool, content_id).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
