//! InMemoryMessageStore - 開発用・テスト用の MessageStore
//!
//! Implements the full storage contract, including the error-tracking side
//! table and the per-failure-type retry counters, so it behaves like the
//! relational backends rather than dropping failed messages.
//!
//! # 実装詳細
//! - `messages`: single source of truth for every record (all statuses)
//! - `ready`: ordered index of Waiting records (priority, queued_at, seq)
//! - `errors`: error records keyed by message id
//! - `retries`: attempt counters keyed by (message id, failure type)
//!
//! One `tokio::sync::Mutex` guards everything, so each trait call is atomic.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    ErrorRecord, FailureReason, FailureType, Headers, MessageStatus, NewMessage, Priority,
    QueueId, QueueMessageRecord, RouteFilter,
};
use crate::error::{StorageError, StorageResult};
use crate::ports::{Clock, IdGenerator, MessageStore, QueueCounts, RecordFilter, SystemClock, UlidGenerator};

/// Messages without a priority sort after every explicit priority.
const UNSET_PRIORITY_RANK: u16 = Priority::MAX as u16 + 1;

/// Ordering key of the ready index: earlier entries are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: u16,
    queued_at: DateTime<Utc>,
    seq: u64,
    queue_id: QueueId,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    record: QueueMessageRecord,
    seq: u64,
}

impl StoredMessage {
    fn ready_key(&self) -> ReadyKey {
        ReadyKey {
            priority: self
                .record
                .priority
                .map_or(UNSET_PRIORITY_RANK, u16::from),
            queued_at: self.record.queued_at,
            seq: self.seq,
            queue_id: self.record.queue_id,
        }
    }
}

#[derive(Default)]
struct StoreState {
    messages: HashMap<QueueId, StoredMessage>,
    ready: BTreeSet<ReadyKey>,
    errors: HashMap<QueueId, ErrorRecord>,
    retries: HashMap<(QueueId, FailureType), u32>,
    next_seq: u64,
}

impl StoreState {
    fn remove(&mut self, queue_id: QueueId) -> bool {
        let Some(stored) = self.messages.remove(&queue_id) else {
            return false;
        };
        self.ready.remove(&stored.ready_key());
        self.errors.remove(&queue_id);
        self.retries.retain(|(id, _), _| *id != queue_id);
        true
    }

    /// Mutable access to a Processing record whose heartbeat equals `expected`.
    fn leased_mut(&mut self, queue_id: QueueId, expected: DateTime<Utc>) -> Option<&mut StoredMessage> {
        self.messages
            .get_mut(&queue_id)
            .filter(|stored| stored.record.holds_lease(expected))
    }
}

fn invalid(err: crate::domain::InvalidTransition) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// In-memory `MessageStore`.
pub struct InMemoryMessageStore {
    state: Arc<Mutex<StoreState>>,
    ids: Arc<dyn IdGenerator>,
    unavailable: AtomicBool,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(UlidGenerator::new(Arc::new(SystemClock))))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_id_generator(Arc::new(UlidGenerator::new(clock)))
    }

    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            ids,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of one record, for inspection.
    pub async fn get(&self, queue_id: QueueId) -> Option<QueueMessageRecord> {
        let state = self.state.lock().await;
        state.messages.get(&queue_id).map(|stored| stored.record.clone())
    }

    /// Current attempt counter for `(queue_id, failure_type)`.
    pub async fn retry_count(&self, queue_id: QueueId, failure_type: &FailureType) -> u32 {
        let state = self.state.lock().await;
        state
            .retries
            .get(&(queue_id, failure_type.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory store marked unavailable".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> StorageResult<QueueId> {
        self.check_available()?;
        let queue_id = self.ids.generate_queue_id();

        let mut state = self.state.lock().await;
        if state.messages.contains_key(&queue_id) {
            return Err(StorageError::Duplicate(queue_id));
        }
        let seq = state.next_seq;
        state.next_seq += 1;

        let stored = StoredMessage {
            record: QueueMessageRecord::from_new(queue_id, message),
            seq,
        };
        state.ready.insert(stored.ready_key());
        state.messages.insert(queue_id, stored);
        Ok(queue_id)
    }

    async fn claim_next(
        &self,
        route: &RouteFilter,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<QueueMessageRecord>> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        // 期限切れは二度と claim できないので ready から外す
        let mut expired = Vec::new();
        let mut chosen = None;
        for key in &state.ready {
            let Some(stored) = state.messages.get(&key.queue_id) else {
                continue;
            };
            if stored.record.is_expired_at(now) {
                expired.push(*key);
            } else if stored.record.is_claimable_at(now)
                && route.matches(stored.record.route.as_deref())
            {
                chosen = Some(*key);
                break;
            }
        }
        for key in &expired {
            state.ready.remove(key);
        }
        let Some(key) = chosen else {
            return Ok(None);
        };

        state.ready.remove(&key);
        let Some(stored) = state.messages.get_mut(&key.queue_id) else {
            return Ok(None);
        };
        stored.record.claim(now).map_err(invalid)?;
        Ok(Some(stored.record.clone()))
    }

    async fn update_heartbeat(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        new: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        match state.leased_mut(queue_id, expected) {
            Some(stored) => {
                stored.record.renew(new);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reset_heartbeat(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        headers: &Headers,
    ) -> StorageResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(stored) = state.leased_mut(queue_id, expected) else {
            return Ok(false);
        };
        stored.record.reset_lease(headers.clone()).map_err(invalid)?;
        let key = stored.ready_key();
        state.ready.insert(key);
        Ok(true)
    }

    async fn requeue(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        delay_until: Option<DateTime<Utc>>,
        failure: &FailureReason,
    ) -> StorageResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(stored) = state.leased_mut(queue_id, expected) else {
            return Ok(false);
        };
        stored
            .record
            .requeue(delay_until, failure.clone())
            .map_err(invalid)?;
        let key = stored.ready_key();
        state.ready.insert(key);
        Ok(true)
    }

    async fn delete(&self, queue_id: QueueId) -> StorageResult<u64> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(u64::from(state.remove(queue_id)))
    }

    async fn delete_many(&self, queue_ids: &[QueueId]) -> StorageResult<u64> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let deleted = queue_ids
            .iter()
            .filter(|queue_id| state.remove(**queue_id))
            .count();
        Ok(deleted as u64)
    }

    async fn find(&self, filter: &RecordFilter) -> StorageResult<Vec<QueueMessageRecord>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut matching: Vec<&StoredMessage> = state
            .messages
            .values()
            .filter(|stored| filter.matches(&stored.record))
            .collect();
        matching.sort_by_key(|stored| stored.seq);

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn record_failure(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        failure_type: &FailureType,
    ) -> StorageResult<Option<u32>> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.leased_mut(queue_id, expected).is_none() {
            return Ok(None);
        }
        let count = state
            .retries
            .entry((queue_id, failure_type.clone()))
            .or_insert(0);
        *count += 1;
        Ok(Some(*count))
    }

    async fn move_to_error(
        &self,
        queue_id: QueueId,
        expected: DateTime<Utc>,
        failure: &FailureReason,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let Some(stored) = state.leased_mut(queue_id, expected) else {
            return Ok(false);
        };
        stored.record.mark_error(failure.clone()).map_err(invalid)?;
        let error = ErrorRecord {
            queue_id,
            failure: failure.clone(),
            last_exception: failure.full_text(),
            failed_at: at,
            attempts,
            body: stored.record.body.clone(),
            headers: stored.record.headers.clone(),
        };
        state.errors.insert(queue_id, error);
        Ok(true)
    }

    async fn find_errors(
        &self,
        older_than: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<ErrorRecord>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut errors: Vec<ErrorRecord> = state
            .errors
            .values()
            .filter(|error| older_than.is_none_or(|threshold| error.failed_at < threshold))
            .cloned()
            .collect();
        errors.sort_by_key(|error| (error.failed_at, error.queue_id));
        Ok(errors)
    }

    async fn counts(&self, now: DateTime<Utc>) -> StorageResult<QueueCounts> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for stored in state.messages.values() {
            let record = &stored.record;
            if record.is_expired_at(now) {
                counts.expired += 1;
                continue;
            }
            match record.status {
                MessageStatus::Waiting if record.is_claimable_at(now) => counts.waiting += 1,
                MessageStatus::Waiting => counts.delayed += 1,
                MessageStatus::Processing => counts.processing += 1,
                MessageStatus::Error => counts.error += 1,
            }
        }
        Ok(counts)
    }
}
