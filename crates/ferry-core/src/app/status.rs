//! Status - per-state job counts.

use serde::{Deserialize, Serialize};

use crate::domain::JobState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn add(&mut self, state: JobState) {
        match state {
            JobState::Queued => self.queued += 1,
            JobState::Running => self.running += 1,
            JobState::Succeeded => self.succeeded += 1,
            JobState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.succeeded + self.failed
    }

    /// Jobs not yet in a terminal state.
    pub fn in_flight(&self) -> usize {
        self.queued + self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_buckets_by_state() {
        let mut counts = QueueCounts::default();
        for state in [
            JobState::Queued,
            JobState::Queued,
            JobState::Running,
            JobState::Failed,
        ] {
            counts.add(state);
        }
        assert_eq!(counts.queued, 2);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.succeeded, 0);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.in_flight(), 3);
    }
}
