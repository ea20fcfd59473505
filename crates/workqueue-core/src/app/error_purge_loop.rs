//! ErrorPurgeLoop - error queue の保持期間管理
//!
//! Deletes error records older than `ErrorRetention.MaxAge`. Only started
//! when retention is enabled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::app::ticker::Ticker;
use crate::ports::Clock;
use crate::queue::ErrorQueue;
use crate::schedule::Schedule;

pub struct ErrorPurgeLoop {
    errors: ErrorQueue,
    max_age: Duration,
    schedule: Schedule,
    clock: Arc<dyn Clock>,
}

impl ErrorPurgeLoop {
    pub fn new(errors: ErrorQueue, max_age: Duration, schedule: Schedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            errors,
            max_age,
            schedule,
            clock,
        }
    }

    pub async fn tick(&self) -> Option<u64> {
        match self.errors.purge_once(self.max_age).await {
            Ok(deleted) => Some(deleted),
            Err(e) => {
                tracing::warn!(error = %e, "error queue purge failed");
                None
            }
        }
    }

    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        let ticker = Ticker::new("error_retention", self.schedule.clone(), Arc::clone(&self.clock));
        let this = &self;
        ticker
            .run(shutdown_rx, move || async move {
                this.tick().await;
            })
            .await;
    }
}
