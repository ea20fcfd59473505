//! ReaperLoop - 放置された lease の回収
//!
//! # フロー
//! 1. heartbeat が `HeartBeat.Time` より古い Processing を検索
//! 2. 読んだ heartbeat を条件に Waiting へ戻す（CAS、失敗はスキップ）
//! 3. 失敗しても次の tick で再試行

use std::sync::Arc;

use tokio::sync::watch;

use crate::app::ticker::Ticker;
use crate::ports::Clock;
use crate::queue::{HeartbeatManager, ResetSummary};
use crate::schedule::Schedule;

pub struct ReaperLoop {
    heartbeats: HeartbeatManager,
    schedule: Schedule,
    clock: Arc<dyn Clock>,
}

impl ReaperLoop {
    pub fn new(heartbeats: HeartbeatManager, schedule: Schedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            heartbeats,
            schedule,
            clock,
        }
    }

    /// One scan. Errors are logged, never propagated.
    pub async fn tick(&self) -> Option<ResetSummary> {
        match self.heartbeats.scan_once().await {
            Ok(summary) => {
                if summary.scanned > 0 {
                    tracing::info!(
                        scanned = summary.scanned,
                        reset = summary.reset,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        "stale lease scan"
                    );
                }
                Some(summary)
            }
            Err(e) => {
                tracing::warn!(error = %e, "stale lease scan failed");
                None
            }
        }
    }

    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        let ticker = Ticker::new("heartbeat", self.schedule.clone(), Arc::clone(&self.clock));
        let this = &self;
        ticker
            .run(shutdown_rx, move || async move {
                this.tick().await;
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Headers, MessageStatus, RouteFilter};
    use crate::impls::InMemoryMessageStore;
    use crate::ports::{FixedClock, MessageStore};
    use crate::queue::{MessageQueue, QueueSettings, RetryPolicy, SendOptions};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[tokio::test]
    async fn tick_survives_store_outage() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemoryMessageStore::with_clock(clock.clone()));
        let reaper = ReaperLoop::new(
            HeartbeatManager::new(store.clone(), clock.clone(), Duration::from_secs(60)),
            Schedule::interval(Duration::from_millis(5)).unwrap(),
            clock.clone(),
        );

        store.set_unavailable(true);
        assert!(reaper.tick().await.is_none());
        store.set_unavailable(false);
        assert_eq!(reaper.tick().await, Some(ResetSummary::default()));
    }

    #[tokio::test]
    async fn running_loop_reclaims_abandoned_leases() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(InMemoryMessageStore::with_clock(clock.clone()));
        let queue = MessageQueue::new(
            store.clone(),
            clock.clone(),
            RetryPolicy::default(),
            QueueSettings::default(),
        );
        let id = queue.send("job", Headers::new(), SendOptions::new()).await.unwrap();
        queue.dequeue().await.unwrap().unwrap();
        clock.advance(Duration::from_secs(120));

        let (tx, rx) = watch::channel(false);
        let reaper = ReaperLoop::new(
            queue.heartbeats().clone(),
            Schedule::interval(Duration::from_millis(5)).unwrap(),
            clock.clone(),
        );
        let join = tokio::spawn(reaper.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        join.await.unwrap();

        assert_eq!(store.get(id).await.unwrap().status, MessageStatus::Waiting);
        assert!(store.claim_next(&RouteFilter::Any, clock.now()).await.unwrap().is_some());
    }
}
