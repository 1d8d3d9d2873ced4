use serde::Deserialize;
use std::time::Duration;

use crate::services::backoff::BackoffPolicy;
use crate::services::worker::WorkerConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus listener address for the worker process.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis host for the job broker
    pub redis_host: String,

    /// Redis port for the job broker
    pub redis_port: u16,

    #[serde(default)]
    pub redis_password: Option<String>,

    /// Base URL of the classification service (e.g., "http://localhost:8000")
    pub ml_url: String,

    /// Bearer credential expected by the classification service
    pub svc_jwt: String,

    /// Broker queue name, used as the Redis key prefix
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,

    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Number of concurrent consumers in the worker pool
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_queue_name() -> String {
    "moderation.jobs".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_classifier_timeout_ms() -> u64 {
    10_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

impl AppConfig {
    /// Load from the process environment (and `.env` if present), then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ml_url.trim().is_empty() {
            return Err(ConfigError::Invalid("ML_URL must not be empty".into()));
        }
        if self.svc_jwt.trim().is_empty() {
            return Err(ConfigError::Invalid("SVC_JWT must not be empty".into()));
        }
        if self.redis_host.trim().is_empty() {
            return Err(ConfigError::Invalid("REDIS_HOST must not be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("MAX_ATTEMPTS must be at least 1".into()));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "WORKER_CONCURRENCY must be at least 1".into(),
            ));
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "BACKOFF_MAX_MS must be >= BACKOFF_BASE_MS > 0".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("POLL_INTERVAL_MS must be at least 1".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("SWEEP_INTERVAL_MS must be at least 1".into()));
        }
        // The lease must outlive the worst-case processing time of a job.
        let processing_ms = self
            .classifier_timeout_ms
            .checked_add(self.store_timeout_ms)
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "CLASSIFIER_TIMEOUT_MS + STORE_TIMEOUT_MS is out of range".into(),
                )
            })?;
        if self.lease_ms <= processing_ms {
            return Err(ConfigError::Invalid(format!(
                "LEASE_MS ({}) must exceed CLASSIFIER_TIMEOUT_MS + STORE_TIMEOUT_MS ({})",
                self.lease_ms, processing_ms
            )));
        }
        Ok(())
    }

    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}", password, self.redis_host, self.redis_port)
            }
            _ => format!("redis://{}:{}", self.redis_host, self.redis_port),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker_concurrency,
            lease: Duration::from_millis(self.lease_ms),
            classifier_timeout: self.classifier_timeout(),
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing or malformed environment variable: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
