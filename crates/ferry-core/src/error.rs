use thiserror::Error;

use crate::domain::{JobId, JobState, TaskName};

pub type Result<T> = std::result::Result<T, FerryError>;

#[derive(Debug, Error)]
pub enum FerryError {
    /// The store could not be reached or did not answer in time.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller's lease on the job is gone (reclaimed, superseded or lapsed).
    #[error("lease expired for {0}")]
    LeaseExpired(JobId),

    #[error("no handler registered for task {0}")]
    UnknownTask(TaskName),

    #[error("invalid task name {name:?}: {reason}")]
    InvalidTaskName { name: String, reason: &'static str },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// A stored record could not be decoded.
    #[error("corrupt job record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("invalid transition for {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("duplicate handler for task {0}")]
    DuplicateHandler(TaskName),

    #[error("missing handlers for expected tasks: {0:?}")]
    MissingTaskTypes(Vec<String>),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl FerryError {
    /// Infrastructure errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, FerryError::StoreUnavailable(_))
    }

    pub fn store_unavailable(err: impl std::fmt::Display) -> Self {
        FerryError::StoreUnavailable(err.to_string())
    }
}
