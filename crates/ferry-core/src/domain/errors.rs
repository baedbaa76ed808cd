//! Failure classification recorded on a job.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an attempt did not succeed.
///
/// - Transient: the handler asked for a retry (default for handler errors)
/// - Permanent: the handler gave up, or panicked
/// - UnknownTask: no handler is registered for the task name
/// - LeaseExpired: the worker stalled on the last allowed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    UnknownTask,
    LeaseExpired,
}

impl ErrorKind {
    /// May the job be queued again after a failure of this kind?
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::Transient
    }
}

/// Failure details stored on the job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn unknown_task(task_name: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::UnknownTask,
            format!("no handler registered for task {task_name}"),
        )
    }

    pub fn lease_expired() -> Self {
        Self::new(
            ErrorKind::LeaseExpired,
            "lease expired on the final attempt",
        )
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
