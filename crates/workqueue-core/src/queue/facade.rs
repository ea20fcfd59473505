//! MessageQueue - producer / consumer facade over a `MessageStore`
//!
//! # フロー
//! 1. `send()` で Waiting として永続化
//! 2. `dequeue()` で原子的に claim（Processing + heartbeat）
//! 3. 成功なら `commit()`、失敗なら `rollback()` で policy に従い再投入 or error queue
//!
//! Every status change below a claim is conditional on the lease heartbeat;
//! this type never decides mutual exclusion on its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    CorrelationId, FailureReason, Headers, NewMessage, Priority, QueueId, Route, RouteFilter,
};
use crate::error::{QueueError, Result};
use crate::ports::clock::after;
use crate::ports::{Clock, MessageStore};
use crate::queue::error_queue::ErrorQueue;
use crate::queue::heartbeat::HeartbeatManager;
use crate::queue::lease::{LeaseKeeper, MessageLease};
use crate::queue::retry::{RetryDecision, RetryPolicy};
use crate::schedule::Schedule;

/// Per-message options for `MessageQueue::send`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub correlation_id: Option<CorrelationId>,
    pub route: Option<Route>,
    /// Falls back to the queue's default priority when unset.
    pub priority: Option<Priority>,
    /// Not claimable before `now + delay`.
    pub delay: Option<Duration>,
    /// Deleted by the expiration reaper at `now + ttl`.
    pub ttl: Option<Duration>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn route(mut self, route: impl Into<Route>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Deleted,
    /// Already committed, expired or purged. Not an error.
    AlreadyGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Requeued {
        attempt: u32,
        delay_until: Option<DateTime<Utc>>,
    },
    MovedToError {
        attempts: u32,
    },
    /// Someone else reclaimed or deleted the message; nothing was changed.
    LeaseLost,
}

/// Settings the facade needs from configuration.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub heartbeat_time: Duration,
    pub heartbeat_update: Schedule,
    pub route_filter: RouteFilter,
    pub default_priority: Option<Priority>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            heartbeat_time: Duration::from_secs(60),
            heartbeat_update: Schedule::Interval(Duration::from_secs(15)),
            route_filter: RouteFilter::Any,
            default_priority: None,
        }
    }
}

#[derive(Clone)]
pub struct MessageQueue {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    policy: Arc<RetryPolicy>,
    heartbeats: HeartbeatManager,
    errors: ErrorQueue,
    settings: Arc<QueueSettings>,
}

impl MessageQueue {
    pub fn new(
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        settings: QueueSettings,
    ) -> Self {
        let heartbeats =
            HeartbeatManager::new(Arc::clone(&store), Arc::clone(&clock), settings.heartbeat_time);
        let errors = ErrorQueue::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            clock,
            policy: Arc::new(policy),
            heartbeats,
            errors,
            settings: Arc::new(settings),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn heartbeats(&self) -> &HeartbeatManager {
        &self.heartbeats
    }

    pub fn errors(&self) -> &ErrorQueue {
        &self.errors
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Persist a new Waiting message.
    pub async fn send(
        &self,
        body: impl Into<Vec<u8>>,
        headers: Headers,
        options: SendOptions,
    ) -> Result<QueueId> {
        let now = self.clock.now();
        let message = NewMessage {
            body: body.into(),
            headers,
            correlation_id: options.correlation_id,
            route: options.route,
            priority: options.priority.or(self.settings.default_priority),
            queued_at: now,
            delay_until: options
                .delay
                .filter(|delay| !delay.is_zero())
                .map(|delay| after(now, delay)),
            expiration: options.ttl.map(|ttl| after(now, ttl)),
        };

        let queue_id = self.store.insert(message).await?;
        tracing::debug!(%queue_id, "message sent");
        Ok(queue_id)
    }

    /// `send` with the body encoded as JSON.
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        body: &T,
        headers: Headers,
        options: SendOptions,
    ) -> Result<QueueId> {
        let body = serde_json::to_vec(body).map_err(QueueError::Encode)?;
        self.send(body, headers, options).await
    }

    /// Claim the next message for this queue's configured routes.
    pub async fn dequeue(&self) -> Result<Option<MessageLease>> {
        self.dequeue_with(&self.settings.route_filter).await
    }

    pub async fn dequeue_with(&self, route: &RouteFilter) -> Result<Option<MessageLease>> {
        let Some(record) = self.store.claim_next(route, self.clock.now()).await? else {
            return Ok(None);
        };
        let lease = MessageLease::from_claimed(record)?;
        tracing::debug!(queue_id = %lease.queue_id(), "message claimed");
        Ok(Some(lease))
    }

    /// Delete a processed message. Idempotent.
    pub async fn commit(&self, queue_id: QueueId) -> Result<CommitOutcome> {
        let outcome = match self.store.delete(queue_id).await? {
            0 => CommitOutcome::AlreadyGone,
            _ => CommitOutcome::Deleted,
        };
        tracing::debug!(%queue_id, ?outcome, "message committed");
        Ok(outcome)
    }

    /// Report a processing failure.
    ///
    /// The attempt counter for the failure type is incremented before the
    /// policy runs, and only while the lease is held. `increase_delay` is added
    /// to the configured delay when the message is retried.
    pub async fn rollback(
        &self,
        lease: &MessageLease,
        failure: FailureReason,
        increase_delay: Option<Duration>,
    ) -> Result<RollbackOutcome> {
        let queue_id = lease.queue_id();
        let heartbeat = lease.lock_heartbeat().await;

        let Some(attempt) = self
            .store
            .record_failure(queue_id, *heartbeat, &failure.failure_type)
            .await?
        else {
            tracing::warn!(%queue_id, "rollback skipped, lease no longer held");
            return Ok(RollbackOutcome::LeaseLost);
        };

        let outcome = match self.policy.decide(&failure.failure_type, attempt, increase_delay) {
            RetryDecision::Retry { attempt, delay } => {
                let delay_until = (!delay.is_zero()).then(|| after(self.clock.now(), delay));
                if self
                    .store
                    .requeue(queue_id, *heartbeat, delay_until, &failure)
                    .await?
                {
                    tracing::info!(
                        %queue_id,
                        failure_type = %failure.failure_type,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "message requeued"
                    );
                    RollbackOutcome::Requeued {
                        attempt,
                        delay_until,
                    }
                } else {
                    RollbackOutcome::LeaseLost
                }
            }
            RetryDecision::MoveToError { attempt } => {
                if self
                    .errors
                    .move_held(queue_id, *heartbeat, &failure, attempt)
                    .await?
                {
                    RollbackOutcome::MovedToError { attempts: attempt }
                } else {
                    RollbackOutcome::LeaseLost
                }
            }
        };

        if outcome == RollbackOutcome::LeaseLost {
            tracing::warn!(%queue_id, "rollback skipped, lease no longer held");
        }
        Ok(outcome)
    }

    /// Renew `lease` once.
    pub async fn heartbeat(&self, lease: &MessageLease) -> Result<()> {
        self.heartbeats.send_heartbeat(lease).await
    }

    /// Start renewing `lease` on the configured update schedule.
    pub fn keep_alive(&self, lease: &MessageLease) -> LeaseKeeper {
        LeaseKeeper::start(
            self.heartbeats.clone(),
            lease.clone(),
            self.settings.heartbeat_update.clone(),
        )
    }
}
