//! Message record: the persisted unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::FailureReason;
use super::headers::Headers;
use super::ids::{CorrelationId, QueueId};
use super::status::{Destination, InvalidTransition, MessageStatus, Transition};

/// Partition label restricting which consumers may claim a message.
pub type Route = String;

/// Ordering hint: lower value means higher priority.
pub type Priority = u8;

/// A message as persisted by a store.
///
/// Design:
/// - This is the "single source of truth" for message state.
/// - All status changes go through the transition methods below, which consult
///   `MessageStatus::apply`. Stores decide *whether* a change may happen
///   (conditional on heartbeat); these methods decide *what* it does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessageRecord {
    pub queue_id: QueueId,
    pub status: MessageStatus,
    pub correlation_id: Option<CorrelationId>,
    pub body: Vec<u8>,
    pub headers: Headers,
    pub queued_at: DateTime<Utc>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub route: Option<Route>,
    pub priority: Option<Priority>,
    pub expiration: Option<DateTime<Utc>>,
    pub delay_until: Option<DateTime<Utc>>,
    pub last_failure: Option<FailureReason>,
}

impl QueueMessageRecord {
    pub fn from_new(queue_id: QueueId, message: NewMessage) -> Self {
        Self {
            queue_id,
            status: MessageStatus::Waiting,
            correlation_id: message.correlation_id,
            body: message.body,
            headers: message.headers,
            queued_at: message.queued_at,
            heartbeat: None,
            route: message.route,
            priority: message.priority,
            expiration: message.expiration,
            delay_until: message.delay_until,
            last_failure: None,
        }
    }

    /// Waiting, past its delay and not expired. Route is checked separately.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable()
            && self.delay_until.is_none_or(|until| until <= now)
            && !self.is_expired_at(now)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }

    /// Does the lease on this record still carry `expected` as its heartbeat?
    pub fn holds_lease(&self, expected: DateTime<Utc>) -> bool {
        self.status == MessageStatus::Processing && self.heartbeat == Some(expected)
    }

    /// Waiting -> Processing.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(Transition::Claim)?;
        self.heartbeat = Some(now);
        Ok(())
    }

    /// Renew the lease. Not a status change.
    pub fn renew(&mut self, now: DateTime<Utc>) {
        self.heartbeat = Some(now);
    }

    /// Processing -> Waiting after a failure with retries left.
    pub fn requeue(
        &mut self,
        delay_until: Option<DateTime<Utc>>,
        failure: FailureReason,
    ) -> Result<(), InvalidTransition> {
        self.transition(Transition::RetryRollback)?;
        self.heartbeat = None;
        self.delay_until = delay_until;
        self.last_failure = Some(failure);
        Ok(())
    }

    /// Processing -> Waiting after the consumer stopped heart-beating.
    pub fn reset_lease(&mut self, headers: Headers) -> Result<(), InvalidTransition> {
        self.transition(Transition::HeartbeatReset)?;
        self.heartbeat = None;
        self.headers = headers;
        Ok(())
    }

    /// Processing -> Error after retries are exhausted.
    pub fn mark_error(&mut self, failure: FailureReason) -> Result<(), InvalidTransition> {
        self.transition(Transition::ErrorRollback)?;
        self.heartbeat = None;
        self.last_failure = Some(failure);
        Ok(())
    }

    fn transition(&mut self, transition: Transition) -> Result<(), InvalidTransition> {
        match self.status.apply(transition)? {
            Destination::Status(next) => {
                self.status = next;
                Ok(())
            }
            // Deletion is performed by removing the record, not by mutating it.
            Destination::Deleted => Err(InvalidTransition {
                from: self.status,
                transition,
            }),
        }
    }
}

/// Everything a producer supplies; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub correlation_id: Option<CorrelationId>,
    pub route: Option<Route>,
    pub priority: Option<Priority>,
    pub queued_at: DateTime<Utc>,
    pub delay_until: Option<DateTime<Utc>>,
    pub expiration: Option<DateTime<Utc>>,
}

/// Projection read by the stale-lease scan, used for compare-and-reset.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageToReset {
    pub queue_id: QueueId,
    pub heartbeat: DateTime<Utc>,
    pub headers: Headers,
}

impl MessageToReset {
    /// Builds the projection from a Processing record; `None` for anything else.
    pub fn from_record(record: &QueueMessageRecord) -> Option<Self> {
        match (record.status, record.heartbeat) {
            (MessageStatus::Processing, Some(heartbeat)) => Some(Self {
                queue_id: record.queue_id,
                heartbeat,
                headers: record.headers.clone(),
            }),
            _ => None,
        }
    }
}

/// Error-tracking entry for a permanently failed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub queue_id: QueueId,
    pub failure: FailureReason,
    pub last_exception: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub body: Vec<u8>,
    pub headers: Headers,
}
