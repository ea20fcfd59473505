//! Processing failures reported by message handlers.
//!
//! Handlers return `Err(FailureReason)` instead of raising. The `failure_type`
//! plays the role of an exception type: the retry policy is keyed on it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a failure class (for example `"http.timeout"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureType(String);

impl FailureType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FailureType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Why a message could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub failure_type: FailureType,
    pub message: String,

    /// Full diagnostic text (source chain, backtrace), kept in the error queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FailureReason {
    pub fn new(failure_type: impl Into<FailureType>, message: impl Into<String>) -> Self {
        Self {
            failure_type: failure_type.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Capture a std error, including its source chain, as a failure.
    pub fn from_error(failure_type: impl Into<FailureType>, err: &dyn std::error::Error) -> Self {
        let mut detail = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            detail.push_str("\ncaused by: ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            failure_type: failure_type.into(),
            message: err.to_string(),
            detail: Some(detail),
        }
    }

    /// Text recorded as the message's last exception.
    pub fn full_text(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}\n{}", self.failure_type, self.message, detail),
            None => format!("{}: {}", self.failure_type, self.message),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.failure_type, self.message)
    }
}
