//! Retry policy: decides between a delayed requeue and the error queue.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::FailureType;

/// Ordered retry delays per failure type.
///
/// The k-th rollback for a type waits `delays[k-1]`; once the list is used up
/// the message moves to the error queue. Types that are not configured use
/// `default_delays`, which is empty unless set, so unconfigured failures go
/// straight to the error queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryDelayBehavior {
    delays: HashMap<FailureType, Vec<Duration>>,
    default_delays: Vec<Duration>,
}

impl RetryDelayBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, failure_type: impl Into<FailureType>, delays: Vec<Duration>) -> Self {
        self.delays.insert(failure_type.into(), delays);
        self
    }

    pub fn with_default(mut self, delays: Vec<Duration>) -> Self {
        self.default_delays = delays;
        self
    }

    pub fn delays_for(&self, failure_type: &FailureType) -> &[Duration] {
        self.delays
            .get(failure_type)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_delays)
    }
}

/// Outcome of the policy for one rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue as Waiting after `delay`.
    Retry { attempt: u32, delay: Duration },

    /// No retries left for this failure type.
    MoveToError { attempt: u32 },
}

/// Pure decision function over a `RetryDelayBehavior`.
///
/// Given the same behavior, failure type, attempt and explicit delay it always
/// returns the same decision. Applying it is the caller's job.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    behavior: RetryDelayBehavior,
}

impl RetryPolicy {
    pub fn new(behavior: RetryDelayBehavior) -> Self {
        Self { behavior }
    }

    pub fn behavior(&self) -> &RetryDelayBehavior {
        &self.behavior
    }

    /// Decide what attempt number `attempt` (1-based) of `failure_type` leads to.
    ///
    /// `explicit_delay` is added on top of the configured delay; it never turns
    /// an exhausted failure into a retry.
    pub fn decide(
        &self,
        failure_type: &FailureType,
        attempt: u32,
        explicit_delay: Option<Duration>,
    ) -> RetryDecision {
        let delays = self.behavior.delays_for(failure_type);
        let index = attempt.saturating_sub(1) as usize;

        match delays.get(index) {
            Some(delay) if attempt > 0 => RetryDecision::Retry {
                attempt,
                delay: delay.saturating_add(explicit_delay.unwrap_or_default()),
            },
            _ => RetryDecision::MoveToError { attempt },
        }
    }
}
