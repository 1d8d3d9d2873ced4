use tracing_subscriber::EnvFilter;

/// Install the JSON `tracing` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register descriptions for every pipeline metric.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "moderation_jobs_enqueued_total",
        "Total moderation jobs published to the broker"
    );
    metrics::describe_counter!(
        "moderation_jobs_completed_total",
        "Total moderation jobs acked after a durable prediction write"
    );
    metrics::describe_counter!(
        "moderation_jobs_retried_total",
        "Total failed deliveries scheduled for redelivery"
    );
    metrics::describe_counter!(
        "moderation_jobs_dead_total",
        "Total moderation jobs moved to the dead state"
    );
    metrics::describe_counter!(
        "moderation_jobs_abandoned_total",
        "Total deliveries abandoned after losing their lease"
    );
    metrics::describe_histogram!(
        "moderation_classify_seconds",
        "Time spent waiting on the classifier per delivery"
    );
    metrics::describe_gauge!(
        "moderation_queue_depth",
        "Current number of queued moderation jobs"
    );
}
