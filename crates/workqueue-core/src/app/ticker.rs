//! Scheduled tick loop shared by the background monitors.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::ports::Clock;
use crate::schedule::Schedule;

pub(crate) struct Ticker {
    name: &'static str,
    schedule: Schedule,
    clock: Arc<dyn Clock>,
}

impl Ticker {
    pub(crate) fn new(name: &'static str, schedule: Schedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            schedule,
            clock,
        }
    }

    /// Call `tick` on every scheduled instant until shutdown is requested or
    /// the sender is dropped. A tick in progress is never interrupted.
    pub(crate) async fn run<F, Fut>(self, mut shutdown_rx: watch::Receiver<bool>, mut tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::debug!(monitor = self.name, schedule = %self.schedule, "monitor started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let delay = match self.schedule.next_delay(self.clock.now()) {
                Ok(delay) => delay,
                Err(e) => {
                    tracing::error!(monitor = self.name, error = %e, "monitor schedule exhausted");
                    break;
                }
            };

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            tick().await;
        }
        tracing::debug!(monitor = self.name, "monitor stopped");
    }
}
