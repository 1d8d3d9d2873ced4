use metrics_exporter_prometheus::PrometheusBuilder;
use moderation_pipeline::{
    config::AppConfig,
    db::{self, PgResultStore},
    services::{
        classifier::HttpClassifier,
        queue::{Broker, RedisBroker, RetryPolicy},
        worker::WorkerPool,
    },
    telemetry,
};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    telemetry::init_tracing();

    tracing::info!("Starting moderation worker");

    // Load configuration; missing or invalid settings are fatal
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .expect("METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    telemetry::describe_metrics();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing services");
    let broker = RedisBroker::new(
        &config.redis_url(),
        &config.queue_name,
        RetryPolicy::new(config.max_attempts, config.backoff()),
    )
    .expect("Failed to initialize job broker");
    broker
        .health_check()
        .await
        .expect("Failed to reach Redis job broker");

    let classifier = HttpClassifier::new(&config.ml_url, &config.svc_jwt, config.classifier_timeout())
        .expect("Failed to initialize classifier client");

    let store = PgResultStore::new(db_pool.clone());

    let pool = WorkerPool::new(
        Arc::new(broker),
        Arc::new(classifier),
        Arc::new(store),
        config.worker_config(),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received, finishing in-flight jobs");
            shutdown.cancel();
        });
    }

    tracing::info!("Worker ready, starting job processing loop");
    let result = pool.run(shutdown).await;

    db_pool.close().await;

    match result {
        Ok(()) => {
            tracing::info!("Worker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker halted");
            ExitCode::FAILURE
        }
    }
}
