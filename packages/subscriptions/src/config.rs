use crate::clock::ClockSource;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the batch engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// IANA zone every calendar decision is made in (e.g. "UTC", "Asia/Kolkata")
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Maximum subscriptions processed concurrently within one run
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Per-subscription timeout (seconds); a stuck item is recorded as failed
    #[serde(default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,
    /// Offset from local midnight at which "today" is compared against a pause window
    #[serde(default = "default_pause_reference_offset_minutes")]
    pub pause_reference_offset_minutes: i64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_worker_concurrency() -> usize {
    10
}
fn default_item_timeout_secs() -> u64 {
    30
}
fn default_pause_reference_offset_minutes() -> i64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            worker_concurrency: default_worker_concurrency(),
            item_timeout_secs: default_item_timeout_secs(),
            pause_reference_offset_minutes: default_pause_reference_offset_minutes(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            timezone: std::env::var("SUBSCRIPTIONS_TIMEZONE").unwrap_or_else(|_| default_timezone()),
            worker_concurrency: parse_env(
                "SUBSCRIPTIONS_WORKER_CONCURRENCY",
                default_worker_concurrency,
            )?,
            item_timeout_secs: parse_env(
                "SUBSCRIPTIONS_ITEM_TIMEOUT_SECS",
                default_item_timeout_secs,
            )?,
            pause_reference_offset_minutes: parse_env(
                "SUBSCRIPTIONS_PAUSE_OFFSET_MINUTES",
                default_pause_reference_offset_minutes,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would otherwise only fail mid-run
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock()?;
        if self.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "SUBSCRIPTIONS_WORKER_CONCURRENCY".to_string(),
            ));
        }
        if self.item_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SUBSCRIPTIONS_ITEM_TIMEOUT_SECS".to_string(),
            ));
        }
        if !(0..24 * 60).contains(&self.pause_reference_offset_minutes) {
            return Err(ConfigError::InvalidValue(
                "SUBSCRIPTIONS_PAUSE_OFFSET_MINUTES".to_string(),
            ));
        }
        Ok(())
    }

    pub fn clock(&self) -> Result<ClockSource, ConfigError> {
        ClockSource::from_name(&self.timezone)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn pause_reference_offset(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pause_reference_offset_minutes)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: fn() -> T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pause_reference_offset(), chrono::Duration::minutes(10));
        assert_eq!(config.item_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let config = EngineConfig {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = EngineConfig {
            worker_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "timezone": "Asia/Kolkata" }"#).unwrap();
        assert_eq!(config.timezone, "Asia/Kolkata");
        assert_eq!(config.worker_concurrency, 10);
        assert_eq!(config.pause_reference_offset_minutes, 10);
    }
}
