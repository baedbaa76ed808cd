//! JobStore port - the durable queue that owns every job record.
//!
//! # Design principles
//! - The store is the single source of truth. Workers and producers only hold
//!   snapshots and ids.
//! - Every transition (claim, complete, fail, heartbeat, reap) is atomic inside
//!   the store.
//! - Lease authority lives here: follow-up calls must present the token issued
//!   by `claim`, and a stale token gets `LeaseExpired`.
//!
//! # Implementations
//! - `impls::InMemoryStore`: single process, tests
//! - `impls::RedisStore`: shared across processes

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::QueueCounts;
use crate::domain::{JobFailure, JobId, JobRecord, JobState, LeaseToken, WorkerId};
use crate::error::Result;

/// How often the default `claim_wait` retries a non-blocking claim.
pub const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A job handed to one worker together with its lease.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Snapshot taken at claim time (state Running).
    pub job: JobRecord,
    pub token: LeaseToken,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new Queued job before returning.
    async fn submit(&self, job: JobRecord) -> Result<()>;

    /// Atomically claim one eligible Queued job (non-blocking).
    ///
    /// Expired leases are reclaimed first. The claimed job is Running,
    /// `attempt_count` is incremented and a fresh lease token is issued.
    async fn claim(&self, worker_id: WorkerId) -> Result<Option<ClaimedJob>>;

    /// Blocking claim: wait up to `timeout` for a job.
    ///
    /// The default polls `claim` every `CLAIM_POLL_INTERVAL`. Stores with a
    /// wake-up mechanism should override it.
    async fn claim_wait(
        &self,
        worker_id: WorkerId,
        timeout: Duration,
    ) -> Result<Option<ClaimedJob>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(claimed) = self.claim(worker_id).await? {
                return Ok(Some(claimed));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(CLAIM_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Running -> Succeeded.
    async fn complete(
        &self,
        job_id: JobId,
        token: LeaseToken,
        result: serde_json::Value,
    ) -> Result<()>;

    /// Running -> Queued (when `retry_after` is set and attempts remain) or
    /// Running -> Failed. Returns the resulting state.
    async fn fail(
        &self,
        job_id: JobId,
        token: LeaseToken,
        failure: JobFailure,
        retry_after: Option<Duration>,
    ) -> Result<JobState>;

    /// Extend the lease by the store's lease timeout. Returns the new expiry.
    async fn heartbeat(&self, job_id: JobId, token: LeaseToken) -> Result<DateTime<Utc>>;

    /// Current record, if the job exists.
    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>>;

    /// Reclaim every Running job whose lease lapsed. Returns their ids.
    async fn reap_expired(&self) -> Result<Vec<JobId>>;

    async fn counts(&self) -> Result<QueueCounts>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<()>;
}
