//! TaskName - the key a job uses to find its handler.
//!
//! Names are short identifiers such as `echo` or `billing.charge.v1`. Anything
//! else is rejected at enqueue time. A typo then fails at the HTTP layer with a
//! 4xx instead of turning into an `UnknownTask` failure later.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FerryError;

/// Longest accepted task name.
pub const MAX_TASK_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskName(String);

impl TaskName {
    /// Validate and wrap a task name.
    ///
    /// Accepts 1..=128 characters from `[A-Za-z0-9_.:-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, FerryError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    pub fn validate(name: &str) -> Result<(), FerryError> {
        if name.is_empty() {
            return Err(FerryError::InvalidTaskName {
                name: name.to_string(),
                reason: "must not be empty",
            });
        }
        if name.len() > MAX_TASK_NAME_LEN {
            return Err(FerryError::InvalidTaskName {
                name: name.to_string(),
                reason: "longer than 128 characters",
            });
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-');
        if !name.chars().all(allowed) {
            return Err(FerryError::InvalidTaskName {
                name: name.to_string(),
                reason: "only [A-Za-z0-9_.:-] are allowed",
            });
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskName {
    type Error = FerryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskName> for String {
    fn from(name: TaskName) -> Self {
        name.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
