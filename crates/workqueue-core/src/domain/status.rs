//! Message status and the lifecycle transition table.

use serde::{Deserialize, Serialize};

/// Persisted status of a message.
///
/// State transitions:
/// - Waiting -> Processing (claim)
/// - Processing -> Deleted (commit)
/// - Processing -> Waiting (rollback with retries left, or heartbeat reclaim)
/// - Processing -> Error (rollback with retries exhausted)
/// - any -> Deleted (expiration)
/// - Error -> Deleted (error purge)
///
/// `Deleted` is not a status: a deleted message is simply absent from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting to be claimed (possibly delayed until `delay_until`).
    Waiting,

    /// Claimed by a consumer and protected by a heartbeat lease.
    Processing,

    /// Failed permanently; kept for inspection until purged or expired.
    Error,
}

/// Something that happens to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Claim,
    Commit,
    RetryRollback,
    ErrorRollback,
    HeartbeatReset,
    Expire,
    Purge,
}

/// Where a transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Status(MessageStatus),
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transition {transition:?} is not allowed from {from:?}")]
pub struct InvalidTransition {
    pub from: MessageStatus,
    pub transition: Transition,
}

impl MessageStatus {
    /// Pure transition function for the lifecycle state machine.
    pub fn apply(self, transition: Transition) -> Result<Destination, InvalidTransition> {
        use MessageStatus::*;
        use Transition::*;

        let destination = match (self, transition) {
            (Waiting, Claim) => Destination::Status(Processing),
            (Processing, Commit) => Destination::Deleted,
            (Processing, RetryRollback) | (Processing, HeartbeatReset) => {
                Destination::Status(Waiting)
            }
            (Processing, ErrorRollback) => Destination::Status(Error),
            (_, Expire) => Destination::Deleted,
            (Error, Purge) => Destination::Deleted,
            (from, transition) => return Err(InvalidTransition { from, transition }),
        };
        Ok(destination)
    }

    /// Is this message eligible for claim (ignoring delay and route)?
    pub fn is_claimable(self) -> bool {
        matches!(self, MessageStatus::Waiting)
    }

    /// Error is terminal in the protocol: it leaves only by purge or expiration.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claim(MessageStatus::Waiting, Transition::Claim, Destination::Status(MessageStatus::Processing))]
    #[case::commit(MessageStatus::Processing, Transition::Commit, Destination::Deleted)]
    #[case::retry(MessageStatus::Processing, Transition::RetryRollback, Destination::Status(MessageStatus::Waiting))]
    #[case::exhausted(MessageStatus::Processing, Transition::ErrorRollback, Destination::Status(MessageStatus::Error))]
    #[case::reclaim(MessageStatus::Processing, Transition::HeartbeatReset, Destination::Status(MessageStatus::Waiting))]
    #[case::expire_waiting(MessageStatus::Waiting, Transition::Expire, Destination::Deleted)]
    #[case::expire_processing(MessageStatus::Processing, Transition::Expire, Destination::Deleted)]
    #[case::expire_error(MessageStatus::Error, Transition::Expire, Destination::Deleted)]
    #[case::purge(MessageStatus::Error, Transition::Purge, Destination::Deleted)]
    fn allowed_transitions(
        #[case] from: MessageStatus,
        #[case] transition: Transition,
        #[case] expected: Destination,
    ) {
        assert_eq!(from.apply(transition), Ok(expected));
    }

    #[rstest]
    #[case::double_claim(MessageStatus::Processing, Transition::Claim)]
    #[case::commit_waiting(MessageStatus::Waiting, Transition::Commit)]
    #[case::rollback_waiting(MessageStatus::Waiting, Transition::RetryRollback)]
    #[case::reset_waiting(MessageStatus::Waiting, Transition::HeartbeatReset)]
    #[case::claim_error(MessageStatus::Error, Transition::Claim)]
    #[case::retry_error(MessageStatus::Error, Transition::RetryRollback)]
    #[case::purge_processing(MessageStatus::Processing, Transition::Purge)]
    fn rejected_transitions(#[case] from: MessageStatus, #[case] transition: Transition) {
        let err = from.apply(transition).unwrap_err();
        assert_eq!(err.from, from);
        assert_eq!(err.transition, transition);
    }

    #[test]
    fn only_waiting_is_claimable() {
        assert!(MessageStatus::Waiting.is_claimable());
        assert!(!MessageStatus::Processing.is_claimable());
        assert!(!MessageStatus::Error.is_claimable());
    }
}
