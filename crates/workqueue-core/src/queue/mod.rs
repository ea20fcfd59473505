//! Queue module: the protocol engine over a `MessageStore`.
//!
//! Design intent:
//! - Stores own atomicity (conditional updates); this module owns semantics
//!   (what a rollback means, when a lease is stale, what expires).
//! - Consumers hold a `MessageLease` and must either commit or roll back.

pub mod error_queue;
pub mod expiration;
pub mod facade;
pub mod heartbeat;
pub mod lease;
pub mod retry;

pub use error_queue::ErrorQueue;
pub use expiration::ExpirationReaper;
pub use facade::{CommitOutcome, MessageQueue, QueueSettings, RollbackOutcome, SendOptions};
pub use heartbeat::{HeartbeatManager, ResetSummary};
pub use lease::{LeaseKeeper, LeaseLostSignal, MessageLease};
pub use retry::{RetryDecision, RetryDelayBehavior, RetryPolicy};
