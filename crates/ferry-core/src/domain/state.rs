//! Job state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job state.
///
/// State transitions:
/// - Queued -> Running (claim; attempt_count += 1)
/// - Running -> Succeeded
/// - Running -> Failed
/// - Running -> Queued (retry with backoff, or lease expiry reclaim)
///
/// Succeeded and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed (possibly not before `run_at`).
    Queued,

    /// Claimed by a worker holding a lease.
    Running,

    /// Handler returned normally.
    Succeeded,

    /// Gave up: permanent error, unknown task, or attempts exhausted.
    Failed,
}

impl JobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Is the edge `self -> next` part of the state machine?
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running) | (Running, Succeeded) | (Running, Failed) | (Running, Queued)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}
