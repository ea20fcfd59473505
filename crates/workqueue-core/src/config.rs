use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Priority, Route, RouteFilter};
use crate::queue::RetryDelayBehavior;
use crate::schedule::{Schedule, ScheduleError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level queue configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub heartbeat: HeartbeatConfig,
    pub message_expiration: ExpirationConfig,
    pub error_retention: ErrorRetentionConfig,
    pub retry_delay_behavior: RetryConfig,
    pub consumer: ConsumerConfig,
    pub producer: ProducerConfig,
}

impl QueueConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }
}

/// `{ interval_ms = N }` or `{ cron = "expr" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScheduleConfig {
    Interval { interval_ms: u64 },
    Cron { cron: String },
}

impl ScheduleConfig {
    pub fn every(interval: Duration) -> Self {
        ScheduleConfig::Interval {
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn build(&self) -> Result<Schedule, ScheduleError> {
        match self {
            ScheduleConfig::Interval { interval_ms } => {
                Schedule::interval(Duration::from_millis(*interval_ms))
            }
            ScheduleConfig::Cron { cron } => Schedule::cron(cron),
        }
    }
}

/// Lease settings: how long a claim lives without renewal, how often the
/// holder renews it, and how often the stale-lease scanner runs.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub time_ms: u64,
    pub update_time: ScheduleConfig,
    pub monitor_time: ScheduleConfig,
}

impl HeartbeatConfig {
    pub fn time(&self) -> Duration {
        Duration::from_millis(self.time_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            time_ms: 60_000,
            update_time: ScheduleConfig::every(Duration::from_secs(15)),
            monitor_time: ScheduleConfig::every(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpirationConfig {
    pub enabled: bool,
    pub monitor_time: ScheduleConfig,
    /// Upper bound on records deleted per tick. `None` deletes everything found.
    pub batch_limit: Option<usize>,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor_time: ScheduleConfig::every(Duration::from_secs(60)),
            batch_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorRetentionConfig {
    pub enabled: bool,
    pub max_age_ms: u64,
    pub monitor_time: ScheduleConfig,
}

impl ErrorRetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

impl Default for ErrorRetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_ms: 7 * 24 * 60 * 60 * 1000,
            monitor_time: ScheduleConfig::every(Duration::from_secs(60 * 60)),
        }
    }
}

/// Retry delays in milliseconds, keyed by failure type.
///
/// ```toml
/// [retry_delay_behavior]
/// default_ms = [500]
///
/// [retry_delay_behavior.types]
/// timeout = [1000, 2000]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default_ms: Vec<u64>,
    pub types: HashMap<String, Vec<u64>>,
}

impl RetryConfig {
    pub fn behavior(&self) -> RetryDelayBehavior {
        let to_delays = |ms: &[u64]| -> Vec<Duration> {
            ms.iter().copied().map(Duration::from_millis).collect()
        };

        self.types.iter().fold(
            RetryDelayBehavior::new().with_default(to_delays(self.default_ms.as_slice())),
            |behavior, (failure_type, delays)| {
                behavior.with(failure_type.as_str(), to_delays(delays.as_slice()))
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Routes this consumer accepts. Absent means any route.
    pub routes: Option<Vec<Route>>,
    pub poll_interval_ms: u64,
    pub workers: usize,
}

impl ConsumerConfig {
    pub fn route_filter(&self) -> RouteFilter {
        RouteFilter::from(self.routes.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            routes: None,
            poll_interval_ms: 100,
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub default_priority: Option<Priority>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureType;

    #[test]
    fn default_config_values() {
        let config = QueueConfig::default();
        assert_eq!(config.heartbeat.time(), Duration::from_secs(60));
        assert_eq!(
            config.heartbeat.update_time,
            ScheduleConfig::Interval { interval_ms: 15_000 }
        );
        assert_eq!(
            config.heartbeat.monitor_time,
            ScheduleConfig::Interval { interval_ms: 30_000 }
        );
        assert!(config.message_expiration.enabled);
        assert!(!config.error_retention.enabled);
        assert_eq!(
            config.error_retention.max_age(),
            Duration::from_secs(7 * 24 * 3600)
        );
        assert!(config.retry_delay_behavior.types.is_empty());
        assert_eq!(config.consumer.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.consumer.workers, 1);
        assert_eq!(config.consumer.route_filter(), RouteFilter::Any);
        assert_eq!(config.producer.default_priority, None);
    }

    #[test]
    fn toml_parsing_empty_uses_defaults() {
        let config = QueueConfig::from_toml_str("").unwrap();
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let config = QueueConfig::from_toml_str(
            r#"
            [heartbeat]
            time_ms = 5000
            update_time = { interval_ms = 1000 }
            monitor_time = { cron = "*/10 * * * * *" }

            [message_expiration]
            enabled = false

            [retry_delay_behavior.types]
            timeout = [1000, 2000]

            [consumer]
            routes = ["billing"]
            workers = 4

            [producer]
            default_priority = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.heartbeat.time(), Duration::from_secs(5));
        assert_eq!(
            config.heartbeat.monitor_time,
            ScheduleConfig::Cron {
                cron: "*/10 * * * * *".into()
            }
        );
        assert!(!config.message_expiration.enabled);
        // 指定しなかったフィールドはデフォルト
        assert_eq!(
            config.message_expiration.monitor_time,
            ScheduleConfig::Interval { interval_ms: 60_000 }
        );
        assert_eq!(config.consumer.workers, 4);
        assert_eq!(config.consumer.poll_interval_ms, 100);
        assert_eq!(
            config.consumer.route_filter(),
            RouteFilter::only("billing")
        );
        assert_eq!(config.producer.default_priority, Some(3));

        let behavior = config.retry_delay_behavior.behavior();
        assert_eq!(
            behavior.delays_for(&FailureType::new("timeout")),
            &[Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert!(behavior.delays_for(&FailureType::new("other")).is_empty());
    }

    #[test]
    fn schedules_build_into_runtime_values() {
        let interval = ScheduleConfig::every(Duration::from_millis(250)).build().unwrap();
        assert!(matches!(interval, Schedule::Interval(d) if d == Duration::from_millis(250)));

        assert!(ScheduleConfig::Interval { interval_ms: 0 }.build().is_err());
        assert!(ScheduleConfig::Cron { cron: "bogus".into() }.build().is_err());
    }

    #[test]
    fn unknown_schedule_shape_is_a_parse_error() {
        let result = QueueConfig::from_toml_str(
            r#"
            [heartbeat]
            monitor_time = { every = 5 }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.toml");
        std::fs::write(&path, "[consumer]\nworkers = 8\n").unwrap();

        let config = QueueConfig::from_file(&path).unwrap();
        assert_eq!(config.consumer.workers, 8);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = QueueConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
