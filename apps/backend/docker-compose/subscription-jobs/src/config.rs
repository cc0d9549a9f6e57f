use std::env;
use std::str::FromStr;

pub const DEFAULT_STATUS_RUN_CRON: &str = "0 0 5 * * *";
pub const DEFAULT_ORDER_RUN_CRON: &str = "0 0 11 * * *";

#[derive(Clone, Debug)]
pub struct JobsConfig {
    /// Six-field cron expression for the status run, in the engine timezone
    pub status_run_cron: String,
    pub order_run_cron: String,
    /// JSON seed for the in-memory backend
    pub seed_path: Option<String>,
    /// Run both jobs once at startup, status first
    pub run_on_start: bool,
}

impl JobsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = JobsConfig {
            status_run_cron: env::var("STATUS_RUN_CRON")
                .unwrap_or_else(|_| DEFAULT_STATUS_RUN_CRON.to_string()),
            order_run_cron: env::var("ORDER_RUN_CRON")
                .unwrap_or_else(|_| DEFAULT_ORDER_RUN_CRON.to_string()),
            seed_path: env::var("SEED_PATH").ok().filter(|p| !p.is_empty()),
            run_on_start: env::var("RUN_ON_START")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        validate_cron("STATUS_RUN_CRON", &config.status_run_cron)?;
        validate_cron("ORDER_RUN_CRON", &config.order_run_cron)?;

        Ok(config)
    }
}

fn validate_cron(var: &str, expression: &str) -> Result<(), ConfigError> {
    cron::Schedule::from_str(expression)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidCron(var.to_string(), e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid cron expression in {0}: {1}")]
    InvalidCron(String, String),
}
