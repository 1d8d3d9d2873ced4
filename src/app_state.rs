use sqlx::PgPool;
use std::sync::Arc;

use crate::db::ResultStore;
use crate::services::{producer::JobProducer, queue::Broker};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub broker: Arc<dyn Broker>,
    pub producer: JobProducer,
    pub store: Arc<dyn ResultStore>,
}

impl AppState {
    pub fn new(db: PgPool, broker: Arc<dyn Broker>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            db,
            producer: JobProducer::new(broker.clone()),
            broker,
            store,
        }
    }
}
