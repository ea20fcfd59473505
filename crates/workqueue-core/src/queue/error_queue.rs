//! ErrorQueue - permanently failed messages
//!
//! A message lands here when its retries are exhausted. The record stays in
//! the store with status Error next to an `ErrorRecord`; purging deletes both.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ErrorRecord, FailureReason, QueueId};
use crate::error::Result;
use crate::ports::clock::before;
use crate::ports::{Clock, MessageStore};
use crate::queue::lease::MessageLease;

#[derive(Clone)]
pub struct ErrorQueue {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
}

impl ErrorQueue {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Processing -> Error iff the lease is still held. `Ok(false)` when it
    /// was lost.
    pub async fn move_to_error(
        &self,
        lease: &MessageLease,
        failure: &FailureReason,
        attempts: u32,
    ) -> Result<bool> {
        let heartbeat = lease.lock_heartbeat().await;
        self.move_held(lease.queue_id(), *heartbeat, failure, attempts)
            .await
    }

    /// Same as `move_to_error`, for a caller already holding the heartbeat.
    pub(crate) async fn move_held(
        &self,
        queue_id: QueueId,
        heartbeat: chrono::DateTime<chrono::Utc>,
        failure: &FailureReason,
        attempts: u32,
    ) -> Result<bool> {
        let moved = self
            .store
            .move_to_error(queue_id, heartbeat, failure, attempts, self.clock.now())
            .await?;
        if moved {
            tracing::warn!(
                %queue_id,
                failure_type = %failure.failure_type,
                attempts,
                "message moved to error queue"
            );
        }
        Ok(moved)
    }

    /// Error records that failed more than `max_age` ago.
    pub async fn find_eligible_for_deletion(&self, max_age: Duration) -> Result<Vec<ErrorRecord>> {
        let threshold = before(self.clock.now(), max_age);
        Ok(self.store.find_errors(Some(threshold)).await?)
    }

    /// Delete every error record older than `max_age`. Returns rows deleted.
    pub async fn purge_once(&self, max_age: Duration) -> Result<u64> {
        let eligible = self.find_eligible_for_deletion(max_age).await?;
        if eligible.is_empty() {
            return Ok(0);
        }
        let ids: Vec<QueueId> = eligible.iter().map(|record| record.queue_id).collect();
        let deleted = self.store.delete_many(&ids).await?;
        tracing::info!(deleted, "purged error records");
        Ok(deleted)
    }

    /// Every current error record, oldest failure first.
    pub async fn list(&self) -> Result<Vec<ErrorRecord>> {
        Ok(self.store.find_errors(None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Headers, MessageStatus, NewMessage, RouteFilter};
    use crate::impls::InMemoryMessageStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        store: Arc<InMemoryMessageStore>,
        clock: Arc<FixedClock>,
        errors: ErrorQueue,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryMessageStore::with_clock(clock.clone()));
        let errors = ErrorQueue::new(store.clone(), clock.clone());
        Fixture { store, clock, errors }
    }

    impl Fixture {
        async fn claim(&self, body: &str) -> MessageLease {
            self.store
                .insert(NewMessage {
                    body: body.as_bytes().to_vec(),
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
    }

    #[tokio::test]
    async fn move_to_error_keeps_body_and_failure() {
        let f = fixture();
        let lease = f.claim("poison").await;
        let failure = FailureReason::new("decode", "bad json").with_detail("line 1");

        assert!(f.errors.move_to_error(&lease, &failure, 3).await.unwrap());

        let listed = f.errors.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].body, b"poison");
        assert_eq!(listed[0].attempts, 3);
        assert_eq!(listed[0].last_exception, "decode: bad json\nline 1");
        assert_eq!(
            f.store.get(lease.queue_id()).await.unwrap().status,
            MessageStatus::Error
        );
    }

    #[tokio::test]
    async fn move_to_error_needs_the_lease() {
        let f = fixture();
        let lease = f.claim("a").await;
        f.store.delete(lease.queue_id()).await.unwrap();

        let failure = FailureReason::new("io", "boom");
        assert!(!f.errors.move_to_error(&lease, &failure, 1).await.unwrap());
        assert!(f.errors.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_only_removes_records_past_max_age() {
        let f = fixture();
        let failure = FailureReason::new("io", "boom");

        let old = f.claim("old").await;
        f.errors.move_to_error(&old, &failure, 1).await.unwrap();

        f.clock.advance(Duration::from_secs(3600));
        let recent = f.claim("recent").await;
        f.errors.move_to_error(&recent, &failure, 1).await.unwrap();

        f.clock.advance(Duration::from_secs(60));
        let eligible = f
            .errors
            .find_eligible_for_deletion(Duration::from_secs(1800))
            .await
            .unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].queue_id, old.queue_id());

        assert_eq!(f.errors.purge_once(Duration::from_secs(1800)).await.unwrap(), 1);
        assert!(f.store.get(old.queue_id()).await.is_none());
        assert!(f.store.get(recent.queue_id()).await.is_some());
        assert_eq!(f.errors.list().await.unwrap().len(), 1);
    }
}
