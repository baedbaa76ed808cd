//! Job record and its transitions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::JobFailure;
use super::ids::{JobId, LeaseToken, WorkerId};
use super::state::JobState;
use super::task_name::TaskName;
use crate::error::FerryError;

/// Exclusive, time-bounded claim on a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: LeaseToken,
    pub worker_id: WorkerId,
    pub expires_at: DateTime<Utc>,
}

/// One unit of work.
///
/// Design:
/// - The store owns the canonical copy. Copies handed to producers and workers
///   are snapshots.
/// - State only changes through the methods below, which reject edges that
///   are not in the state machine (see `JobState`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub task_name: TaskName,
    pub payload: serde_json::Value,
    pub state: JobState,

    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Number of claims so far, including the current one while Running.
    pub attempt_count: u32,
    pub max_attempts: u32,

    /// Earliest time the job may be claimed. Pushed forward by retry backoff.
    pub run_at: DateTime<Utc>,

    /// Present only while Running.
    pub lease: Option<Lease>,

    pub result: Option<serde_json::Value>,

    /// Most recent failure. Final once the job is Failed.
    pub error: Option<JobFailure>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        task_name: TaskName,
        payload: serde_json::Value,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_name,
            payload,
            state: JobState::Queued,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
            attempt_count: 0,
            max_attempts,
            run_at: now,
            lease: None,
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, next: JobState) -> Result<(), FerryError> {
        if !self.state.can_transition_to(next) {
            return Err(FerryError::InvalidTransition {
                job_id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Eligible for a claim at `now`?
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.run_at <= now
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Queued -> Running. Increments `attempt_count`.
    pub fn start_attempt(&mut self, lease: Lease, now: DateTime<Utc>) -> Result<(), FerryError> {
        self.transition(JobState::Running)?;
        self.attempt_count += 1;
        self.started_at = Some(now);
        self.lease = Some(lease);
        Ok(())
    }

    /// Does `token` hold a live lease on this job at `now`?
    ///
    /// Any mismatch (wrong token, lapsed lease, job no longer Running) is
    /// reported as `LeaseExpired`: the caller's claim is gone either way.
    pub fn check_lease(&self, token: &LeaseToken, now: DateTime<Utc>) -> Result<(), FerryError> {
        match &self.lease {
            Some(lease)
                if self.state == JobState::Running
                    && lease.token == *token
                    && lease.expires_at >= now =>
            {
                Ok(())
            }
            _ => Err(FerryError::LeaseExpired(self.id)),
        }
    }

    pub fn lease_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Running
            && self.lease.as_ref().is_some_and(|l| l.expires_at < now)
    }

    pub fn extend_lease(&mut self, expires_at: DateTime<Utc>) {
        if let Some(lease) = self.lease.as_mut() {
            lease.expires_at = expires_at;
        }
    }

    /// Running -> Succeeded.
    pub fn mark_succeeded(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), FerryError> {
        self.transition(JobState::Succeeded)?;
        self.result = Some(result);
        self.finished_at = Some(now);
        self.lease = None;
        Ok(())
    }

    /// Running -> Failed.
    pub fn mark_failed(&mut self, failure: JobFailure, now: DateTime<Utc>) -> Result<(), FerryError> {
        self.transition(JobState::Failed)?;
        self.error = Some(failure);
        self.finished_at = Some(now);
        self.lease = None;
        Ok(())
    }

    /// Running -> Queued, claimable again at `run_at`.
    pub fn schedule_retry(
        &mut self,
        failure: JobFailure,
        run_at: DateTime<Utc>,
    ) -> Result<(), FerryError> {
        self.transition(JobState::Queued)?;
        self.error = Some(failure);
        self.run_at = run_at;
        self.lease = None;
        Ok(())
    }

    /// Report a failed attempt.
    ///
    /// Requeues when a retry was requested and attempts remain; otherwise the
    /// job fails for good. Returns the resulting state.
    pub fn record_failure(
        &mut self,
        failure: JobFailure,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<JobState, FerryError> {
        match retry_after {
            Some(delay) if !self.attempts_exhausted() => {
                self.schedule_retry(failure, add_duration(now, delay))?;
            }
            _ => self.mark_failed(failure, now)?,
        }
        Ok(self.state)
    }

    /// Lease-expiry reclaim: Running -> Queued without touching `attempt_count`.
    ///
    /// A job stalled on its last allowed attempt fails with `LeaseExpired`
    /// instead, so `attempt_count` never exceeds `max_attempts`.
    pub fn reclaim(&mut self, now: DateTime<Utc>) -> Result<JobState, FerryError> {
        if self.attempts_exhausted() {
            self.mark_failed(JobFailure::lease_expired(), now)?;
        } else {
            self.transition(JobState::Queued)?;
            self.run_at = now;
            self.lease = None;
        }
        Ok(self.state)
    }
}

/// `now + d`, saturating at the far future instead of overflowing.
pub fn add_duration(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
