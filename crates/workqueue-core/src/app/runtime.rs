//! QueueRuntime - 構築済みのキューと背景モニター
//!
//! # 主要コンポーネント
//! - **MessageQueue**: producer / consumer facade
//! - **MonitorGroup**: ReaperLoop / GcLoop / ErrorPurgeLoop をまとめて起動・停止
//! - **WorkerGroup**: 設定されたワーカー数で Pipeline を実行

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::error_purge_loop::ErrorPurgeLoop;
use crate::app::gc_loop::GcLoop;
use crate::app::middleware::Pipeline;
use crate::app::reaper_loop::ReaperLoop;
use crate::app::status::QueueStatus;
use crate::app::worker_loop::WorkerGroup;
use crate::config::QueueConfig;
use crate::ports::{Clock, MessageStore};
use crate::queue::{ExpirationReaper, MessageQueue, QueueSettings, RetryPolicy};
use crate::schedule::Schedule;

/// Parsed monitor schedules, validated by the builder.
#[derive(Debug, Clone)]
pub struct MonitorSchedules {
    pub heartbeat: Schedule,
    pub expiration: Schedule,
    pub error_retention: Schedule,
}

pub struct QueueRuntime {
    config: Arc<QueueConfig>,
    queue: MessageQueue,
    status: QueueStatus,
    schedules: MonitorSchedules,
}

impl QueueRuntime {
    pub(crate) fn new(
        config: Arc<QueueConfig>,
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        settings: QueueSettings,
        schedules: MonitorSchedules,
    ) -> Self {
        let status = QueueStatus::new(Arc::clone(&store), Arc::clone(&clock));
        let queue = MessageQueue::new(store, clock, policy, settings);
        Self {
            config,
            queue,
            status,
            schedules,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn status(&self) -> &QueueStatus {
        &self.status
    }

    /// Start the background monitors enabled in the configuration.
    ///
    /// The stale-lease monitor always runs; expiration and error retention
    /// follow their `enabled` flags.
    pub fn start_monitors(&self) -> MonitorGroup {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let clock = Arc::clone(self.queue.clock());
        let store = Arc::clone(self.queue.store());
        let mut monitors = Vec::new();

        let reaper = ReaperLoop::new(
            self.queue.heartbeats().clone(),
            self.schedules.heartbeat.clone(),
            Arc::clone(&clock),
        );
        monitors.push(("heartbeat", tokio::spawn(reaper.run(shutdown_rx.clone()))));

        let expiration = &self.config.message_expiration;
        if expiration.enabled {
            let gc = GcLoop::new(
                ExpirationReaper::new(Arc::clone(&store), Arc::clone(&clock))
                    .with_batch_limit(expiration.batch_limit),
                self.schedules.expiration.clone(),
                Arc::clone(&clock),
            );
            monitors.push(("expiration", tokio::spawn(gc.run(shutdown_rx.clone()))));
        }

        let retention = &self.config.error_retention;
        if retention.enabled {
            let purge = ErrorPurgeLoop::new(
                self.queue.errors().clone(),
                retention.max_age(),
                self.schedules.error_retention.clone(),
                Arc::clone(&clock),
            );
            monitors.push(("error_retention", tokio::spawn(purge.run(shutdown_rx.clone()))));
        }

        tracing::info!(
            monitors = ?monitors.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "monitors started"
        );
        MonitorGroup {
            shutdown_tx,
            monitors,
        }
    }

    /// Spawn `consumer.workers` workers running `pipeline`.
    pub fn spawn_workers(&self, pipeline: Pipeline) -> WorkerGroup {
        WorkerGroup::spawn(
            self.config.consumer.workers,
            self.queue.clone(),
            Arc::new(pipeline),
            self.config.consumer.poll_interval(),
        )
    }
}

/// Handle over the running background monitors.
pub struct MonitorGroup {
    shutdown_tx: watch::Sender<bool>,
    monitors: Vec<(&'static str, JoinHandle<()>)>,
}

impl MonitorGroup {
    pub fn names(&self) -> Vec<&'static str> {
        self.monitors.iter().map(|(name, _)| *name).collect()
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop every monitor; a tick in progress completes first.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (name, join) in self.monitors {
            if let Err(e) = join.await {
                tracing::error!(monitor = name, error = %e, "monitor task panicked");
            }
        }
        tracing::info!("monitors stopped");
    }
}
