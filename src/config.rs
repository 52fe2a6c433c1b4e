//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::error::ConfigError;

/// Admission queue tunables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Global ceiling on concurrently running worker containers.
    pub max_concurrent: usize,
    /// Maximum consecutive message-check retries before a group's pending
    /// messages are dropped (until a fresh external trigger).
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: 5,
            retry_base_delay: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// Load overrides from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = read_env("GROUP_RUNNER_MAX_CONCURRENT") {
            config.max_concurrent = parse_env("GROUP_RUNNER_MAX_CONCURRENT", &value)?;
        }
        if let Some(value) = read_env("GROUP_RUNNER_MAX_RETRIES") {
            config.max_retries = parse_env("GROUP_RUNNER_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("GROUP_RUNNER_RETRY_BASE_MS") {
            let ms: u64 = parse_env("GROUP_RUNNER_RETRY_BASE_MS", &value)?;
            config.retry_base_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Scheduler loop and task runner tunables.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the task store is polled for due tasks.
    pub poll_interval: Duration,
    /// Timezone used to evaluate cron expressions.
    pub timezone: Tz,
    /// Root directory holding one folder per registered group.
    pub groups_dir: PathBuf,
    /// Folder name of the primary (main) group.
    pub main_group_folder: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            timezone: chrono_tz::UTC,
            groups_dir: PathBuf::from("groups"),
            main_group_folder: "main".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Load overrides from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = read_env("GROUP_RUNNER_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env("GROUP_RUNNER_POLL_INTERVAL_MS", &value)?;
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(value) = read_env("GROUP_RUNNER_TZ") {
            config.timezone = value.parse().map_err(|e| ConfigError::InvalidValue {
                key: "GROUP_RUNNER_TZ".to_string(),
                message: format!("unknown timezone '{value}': {e}"),
            })?;
        }
        if let Some(value) = read_env("GROUP_RUNNER_GROUPS_DIR") {
            config.groups_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("GROUP_RUNNER_MAIN_GROUP") {
            config.main_group_folder = value;
        }
        Ok(config)
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("cannot parse '{value}': {e}"),
    })
}
