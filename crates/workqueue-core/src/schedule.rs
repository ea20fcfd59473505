//! Schedule - when a background loop ticks next.
//!
//! Either a fixed interval or a cron expression (5 or 6 fields, seconds
//! optional). Loops ask for the delay until the next tick from "now".

use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("interval must be greater than zero")]
    ZeroInterval,

    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("cron expression {0:?} has no future occurrence")]
    NoOccurrence(String),
}

#[derive(Debug, Clone)]
pub enum Schedule {
    Interval(Duration),
    Cron { expr: String, cron: Cron },
}

impl Schedule {
    pub fn interval(every: Duration) -> Result<Self, ScheduleError> {
        if every.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        Ok(Schedule::Interval(every))
    }

    pub fn cron(expr: &str) -> Result<Self, ScheduleError> {
        let cron = Cron::new(expr)
            .with_seconds_optional()
            .parse()
            .map_err(|e| ScheduleError::InvalidCron {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        let schedule = Schedule::Cron {
            expr: expr.to_string(),
            cron,
        };
        // 到達しない式（例: 2 月 30 日）は起動時に弾く
        schedule.next_delay(Utc::now())?;
        Ok(schedule)
    }

    /// Time to wait from `now` until the next tick.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Result<Duration, ScheduleError> {
        match self {
            Schedule::Interval(every) => Ok(*every),
            Schedule::Cron { expr, cron } => {
                let next = cron
                    .find_next_occurrence(&now, false)
                    .map_err(|_| ScheduleError::NoOccurrence(expr.clone()))?;
                Ok((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Interval(every) => write!(f, "every {}ms", every.as_millis()),
            Schedule::Cron { expr, .. } => write!(f, "cron {expr:?}"),
        }
    }
}
