//! GcLoop - 期限切れメッセージの削除
//!
//! Runs the expiration reaper on `MessageExpiration.MonitorTime`. Only started
//! when expiration is enabled.

use std::sync::Arc;

use tokio::sync::watch;

use crate::app::ticker::Ticker;
use crate::ports::Clock;
use crate::queue::ExpirationReaper;
use crate::schedule::Schedule;

pub struct GcLoop {
    reaper: ExpirationReaper,
    schedule: Schedule,
    clock: Arc<dyn Clock>,
}

impl GcLoop {
    pub fn new(reaper: ExpirationReaper, schedule: Schedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            reaper,
            schedule,
            clock,
        }
    }

    pub async fn tick(&self) -> Option<u64> {
        match self.reaper.reap_once().await {
            Ok(deleted) => Some(deleted),
            Err(e) => {
                tracing::warn!(error = %e, "expiration sweep failed");
                None
            }
        }
    }

    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        let ticker = Ticker::new("expiration", self.schedule.clone(), Arc::clone(&self.clock));
        let this = &self;
        ticker
            .run(shutdown_rx, move || async move {
                this.tick().await;
            })
            .await;
    }
}
