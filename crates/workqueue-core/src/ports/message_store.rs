//! MessageStore port - storage adapter contract
//!
//! Each backend (relational, Redis, embedded, in-memory) implements this trait.
//! The queue protocol lives above it, so no backend re-implements heartbeat,
//! rollback or expiration logic.
//!
//! # 設計原則
//! - Every mutation of status or heartbeat is conditional and atomic inside the
//!   backend. The `bool` results report whether the condition held.
//! - `find` is lazy per call and restartable; no cursor survives between calls.
//! - Retry counters and error records are persisted, never process-local.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ErrorRecord, FailureReason, FailureType, Headers, MessageStatus, NewMessage, QueueId,
    QueueMessageRecord, RouteFilter,
};
use crate::error::StorageResult;

/// Predicate for `MessageStore::find`. All set fields must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub status: Option<MessageStatus>,

    /// Heartbeat strictly older than this instant.
    pub heartbeat_before: Option<DateTime<Utc>>,

    /// Expiration at or before this instant.
    pub expires_at_or_before: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
}

impl RecordFilter {
    /// Processing records whose heartbeat is older than `threshold`.
    pub fn stale_heartbeat(threshold: DateTime<Utc>) -> Self {
        Self {
            status: Some(MessageStatus::Processing),
            heartbeat_before: Some(threshold),
            ..Self::default()
        }
    }

    /// Records of any status whose expiration has passed.
    pub fn expired(now: DateTime<Utc>) -> Self {
        Self {
            expires_at_or_before: Some(now),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, record: &QueueMessageRecord) -> bool {
        self.status.is_none_or(|status| record.status == status)
            && self
                .heartbeat_before
                .is_none_or(|threshold| record.heartbeat.is_some_and(|hb| hb < threshold))
            && self
                .expires_at_or_before
                .is_none_or(|now| record.is_expired_at(now))
    }
}

/// Counts by effective state, for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Waiting and claimable now.
    pub waiting: usize,
    /// Waiting but held back by `delay_until`.
    pub delayed: usize,
    pub processing: usize,
    pub error: usize,
    /// Past expiration in any status and not yet reaped. Excluded from the
    /// other buckets.
    pub expired: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.delayed + self.processing + self.error + self.expired
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a Waiting record and return its backend-assigned id.
    async fn insert(&self, message: NewMessage) -> StorageResult<QueueId>;

    /// Atomically claim the best eligible Waiting record.
    ///
    /// Eligible: Waiting, `delay_until` absent or <= `now`, not expired, route
    /// accepted by `route`. Order: lowest priority value, oldest `queued_at`,
    /// then insertion order. The claimed record is returned as Processing with
    /// `heartbeat = now`.
    async fn claim_next(
        &self,
        route: &RouteFilter,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<QueueMessageRecord>>;

    /// CAS on the heartbeat of a Processing record.
    async fn update_heartbeat(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        new: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Processing -> Waiting iff the stored heartbeat still equals `expected`.
    async fn reset_heartbeat(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        headers: &Headers,
    ) -> StorageResult<bool>;

    /// Processing -> Waiting (with optional delay) iff the lease is still held.
    async fn requeue(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        delay_until: Option<DateTime<Utc>>,
        failure: &FailureReason,
    ) -> StorageResult<bool>;

    /// Unconditional delete. Returns rows affected (0 when already gone).
    async fn delete(&self, queue_id: QueueId) -> StorageResult<u64>;

    async fn delete_many(&self, queue_ids: &[QueueId]) -> StorageResult<u64>;

    async fn find(&self, filter: &RecordFilter) -> StorageResult<Vec<QueueMessageRecord>>;

    /// Increment the attempt counter for `(queue_id, failure_type)` iff the
    /// lease is still held. Returns `None` (counter untouched) when it is not.
    async fn record_failure(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        failure_type: &FailureType,
    ) -> StorageResult<Option<u32>>;

    /// Processing -> Error iff the lease is still held; writes the error record.
    async fn move_to_error(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        failure: &FailureReason,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Error records whose `failed_at` is strictly older than `threshold`.
    /// `None` lists every error record.
    async fn find_errors(
        &self,
        older_than: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<ErrorRecord>>;

    async fn counts(&self, now: DateTime<Utc>) -> StorageResult<QueueCounts>;
}
