//! HeartbeatManager - lease renewal and stale-lease reclaim
//!
//! Renewal is a CAS from the lease's last heartbeat to now. Reclaim reads a
//! projection of stale Processing records and resets each one with a CAS on
//! the heartbeat it read, so a consumer that renewed in between keeps its
//! lease.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::headers::standard::HEARTBEAT_RESETS;
use crate::domain::MessageToReset;
use crate::error::{QueueError, Result};
use crate::ports::clock::before;
use crate::ports::{Clock, MessageStore, RecordFilter};
use crate::queue::lease::MessageLease;

/// Result of one stale-lease scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub scanned: usize,
    pub reset: usize,
    /// The heartbeat moved (or the record vanished) after it was read.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct HeartbeatManager {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    heartbeat_time: Duration,
    batch_limit: Option<usize>,
}

impl HeartbeatManager {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>, heartbeat_time: Duration) -> Self {
        Self {
            store,
            clock,
            heartbeat_time,
            batch_limit: None,
        }
    }

    pub fn with_batch_limit(mut self, limit: Option<usize>) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn heartbeat_time(&self) -> Duration {
        self.heartbeat_time
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Renew `lease`. Fails with `QueueError::LeaseLost` when the stored
    /// heartbeat no longer matches.
    pub async fn send_heartbeat(&self, lease: &MessageLease) -> Result<()> {
        let mut heartbeat = lease.lock_heartbeat().await;
        // 時計が巻き戻っても heartbeat は単調増加
        let now = self.clock.now().max(*heartbeat);

        if self
            .store
            .update_heartbeat(lease.queue_id(), *heartbeat, now)
            .await?
        {
            *heartbeat = now;
            Ok(())
        } else {
            Err(QueueError::LeaseLost(lease.queue_id()))
        }
    }

    /// Processing records whose heartbeat is older than `threshold_age`.
    pub async fn find_messages_to_reset(&self, threshold_age: Duration) -> Result<Vec<MessageToReset>> {
        let threshold = before(self.clock.now(), threshold_age);
        let filter = RecordFilter::stale_heartbeat(threshold).limit(self.batch_limit);
        let records = self.store.find(&filter).await?;
        Ok(records.iter().filter_map(MessageToReset::from_record).collect())
    }

    /// Return `candidate` to Waiting iff its heartbeat is still the one read.
    ///
    /// `Ok(false)` means the holder renewed (or finished) in the meantime; the
    /// candidate is skipped, not retried.
    pub async fn reset_heartbeat(&self, candidate: &MessageToReset) -> Result<bool> {
        let mut headers = candidate.headers.clone();
        let resets = match headers.get(&HEARTBEAT_RESETS) {
            Ok(count) => count.unwrap_or(0),
            Err(e) => {
                tracing::warn!(queue_id = %candidate.queue_id, error = %e, "malformed reset counter, starting over");
                0
            }
        };
        headers.insert(&HEARTBEAT_RESETS, &resets.saturating_add(1))?;

        let reset = self
            .store
            .reset_heartbeat(candidate.queue_id, candidate.heartbeat, &headers)
            .await?;
        if reset {
            tracing::info!(queue_id = %candidate.queue_id, resets = resets + 1, "stale lease reclaimed");
        }
        Ok(reset)
    }

    /// One pass of the stale-lease monitor. A failed reset does not abort the
    /// batch.
    pub async fn scan_once(&self) -> Result<ResetSummary> {
        let candidates = self.find_messages_to_reset(self.heartbeat_time).await?;
        let mut summary = ResetSummary {
            scanned: candidates.len(),
            ..ResetSummary::default()
        };

        for candidate in &candidates {
            match self.reset_heartbeat(candidate).await {
                Ok(true) => summary.reset += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(queue_id = %candidate.queue_id, error = %e, "heartbeat reset failed");
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Headers, MessageStatus, NewMessage, QueueId, RouteFilter};
    use crate::impls::InMemoryMessageStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    struct Fixture {
        store: Arc<InMemoryMessageStore>,
        clock: Arc<FixedClock>,
        manager: HeartbeatManager,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryMessageStore::with_clock(clock.clone()));
        let manager = HeartbeatManager::new(store.clone(), clock.clone(), Duration::from_secs(60));
        Fixture {
            store,
            clock,
            manager,
        }
    }

    impl Fixture {
        async fn claim(&self) -> MessageLease {
            self.store
                .insert(NewMessage {
                    body: b"work".to_vec(),
                    headers: Headers::new(),
                    correlation_id: None,
                    route: None,
                    priority: None,
                    queued_at: self.clock.now(),
                    delay_until: None,
                    expiration: None,
                })
                .await
                .unwrap();
            let record = self
                .store
                .claim_next(&RouteFilter::Any, self.clock.now())
                .await
                .unwrap()
                .unwrap();
            MessageLease::from_claimed(record).unwrap()
        }

        async fn status(&self, id: QueueId) -> MessageStatus {
            self.store.get(id).await.unwrap().status
        }
    }

    #[tokio::test]
    async fn heartbeat_advances_lease_and_store() {
        let f = fixture();
        let lease = f.claim().await;

        f.clock.advance(Duration::from_secs(10));
        f.manager.send_heartbeat(&lease).await.unwrap();

        assert_eq!(lease.heartbeat().await, f.clock.now());
        assert_eq!(
            f.store.get(lease.queue_id()).await.unwrap().heartbeat,
            Some(f.clock.now())
        );
    }

    #[tokio::test]
    async fn heartbeat_after_reclaim_reports_lease_lost() {
        let f = fixture();
        let lease = f.claim().await;

        f.clock.advance(Duration::from_secs(61));
        let summary = f.manager.scan_once().await.unwrap();
        assert_eq!(summary.reset, 1);

        let err = f.manager.send_heartbeat(&lease).await.unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost(id) if id == lease.queue_id()));
    }

    #[tokio::test]
    async fn fresh_leases_are_not_candidates() {
        let f = fixture();
        f.claim().await;

        f.clock.advance(Duration::from_secs(59));
        assert!(f.manager.find_messages_to_reset(Duration::from_secs(60)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_is_skipped_when_holder_renewed_after_read() {
        let f = fixture();
        let lease = f.claim().await;

        f.clock.advance(Duration::from_secs(61));
        let candidates = f.manager.find_messages_to_reset(Duration::from_secs(60)).await.unwrap();
        assert_eq!(candidates.len(), 1);

        // 読み取り後に所有者が heartbeat を送った
        f.manager.send_heartbeat(&lease).await.unwrap();

        assert!(!f.manager.reset_heartbeat(&candidates[0]).await.unwrap());
        assert_eq!(f.status(lease.queue_id()).await, MessageStatus::Processing);
    }

    #[tokio::test]
    async fn reset_bumps_reset_counter_header() {
        let f = fixture();
        let lease = f.claim().await;

        f.clock.advance(Duration::from_secs(61));
        f.manager.scan_once().await.unwrap();

        let record = f.store.get(lease.queue_id()).await.unwrap();
        assert_eq!(record.status, MessageStatus::Waiting);
        assert_eq!(record.heartbeat, None);
        assert_eq!(record.headers.get(&HEARTBEAT_RESETS).unwrap(), Some(1));

        // 再取得して再度放置
        let record = f
            .store
            .claim_next(&RouteFilter::Any, f.clock.now())
            .await
            .unwrap()
            .unwrap();
        f.clock.advance(Duration::from_secs(61));
        f.manager.scan_once().await.unwrap();
        let record = f.store.get(record.queue_id).await.unwrap();
        assert_eq!(record.headers.get(&HEARTBEAT_RESETS).unwrap(), Some(2));
    }

    #[tokio::test]
    async fn scan_failure_is_reported_not_swallowed() {
        let f = fixture();
        f.store.set_unavailable(true);
        assert!(f.manager.scan_once().await.is_err());
    }
}
