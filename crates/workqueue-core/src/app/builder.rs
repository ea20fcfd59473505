//! QueueBuilder - キューの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::app::runtime::{MonitorSchedules, QueueRuntime};
use crate::config::{QueueConfig, ScheduleConfig};
use crate::impls::InMemoryMessageStore;
use crate::ports::{Clock, MessageStore, SystemClock};
use crate::queue::{QueueSettings, RetryPolicy};
use crate::schedule::{Schedule, ScheduleError};

/// QueueBuilder は設定・ストア・時計を束ねて QueueRuntime を作る
///
/// # 使用例
/// ```ignore
/// let runtime = QueueBuilder::new(QueueConfig::from_file("queue.toml")?)
///     .store(Arc::new(my_store))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - schedule は build() 時にすべて解析する（不正な cron はここで弾く）
/// - heartbeat の更新間隔が lease 時間以上なら BuildError
/// - ストア未指定なら InMemoryMessageStore
pub struct QueueBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn MessageStore>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError はキュー構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid schedule for {field}: {source}")]
    InvalidSchedule {
        field: &'static str,
        #[source]
        source: ScheduleError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl QueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<QueueRuntime, BuildError> {
        let config = self.config;
        validate(&config)?;

        let heartbeat_update = schedule("heartbeat.update_time", &config.heartbeat.update_time)?;
        if let Schedule::Interval(every) = &heartbeat_update {
            if *every >= config.heartbeat.time() {
                return Err(BuildError::InvalidConfig(format!(
                    "heartbeat.update_time ({}ms) must be shorter than heartbeat.time_ms ({}ms)",
                    every.as_millis(),
                    config.heartbeat.time_ms
                )));
            }
        }
        let monitors = MonitorSchedules {
            heartbeat: schedule("heartbeat.monitor_time", &config.heartbeat.monitor_time)?,
            expiration: schedule(
                "message_expiration.monitor_time",
                &config.message_expiration.monitor_time,
            )?,
            error_retention: schedule(
                "error_retention.monitor_time",
                &config.error_retention.monitor_time,
            )?,
        };

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let store: Arc<dyn MessageStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryMessageStore::with_clock(Arc::clone(&clock))),
        };

        let settings = QueueSettings {
            heartbeat_time: config.heartbeat.time(),
            heartbeat_update,
            route_filter: config.consumer.route_filter(),
            default_priority: config.producer.default_priority,
        };
        let policy = RetryPolicy::new(config.retry_delay_behavior.behavior());

        Ok(QueueRuntime::new(
            Arc::new(config),
            store,
            clock,
            policy,
            settings,
            monitors,
        ))
    }
}

fn schedule(field: &'static str, config: &ScheduleConfig) -> Result<Schedule, BuildError> {
    config
        .build()
        .map_err(|source| BuildError::InvalidSchedule { field, source })
}

fn validate(config: &QueueConfig) -> Result<(), BuildError> {
    let invalid = |msg: &str| Err(BuildError::InvalidConfig(msg.to_string()));

    if config.heartbeat.time_ms == 0 {
        return invalid("heartbeat.time_ms must be greater than zero");
    }
    if config.consumer.workers == 0 {
        return invalid("consumer.workers must be at least 1");
    }
    if config.consumer.poll_interval_ms == 0 {
        return invalid("consumer.poll_interval_ms must be greater than zero");
    }
    if config.consumer.routes.as_ref().is_some_and(Vec::is_empty) {
        return invalid("consumer.routes must not be empty when set");
    }
    if config.error_retention.enabled && config.error_retention.max_age_ms == 0 {
        return invalid("error_retention.max_age_ms must be greater than zero");
    }
    for (failure_type, delays) in &config.retry_delay_behavior.types {
        if failure_type.is_empty() {
            return invalid("retry_delay_behavior.types has an empty failure type");
        }
        if delays.is_empty() {
            return Err(BuildError::InvalidConfig(format!(
                "retry_delay_behavior.types.{failure_type} has no delays"
            )));
        }
    }
    Ok(())
}
