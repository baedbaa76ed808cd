//! In-memory job store.
//!
//! Everything lives behind one `tokio::sync::Mutex`, so each operation is
//! atomic with respect to every other. Nothing survives a restart. Use it for
//! tests and for single-process deployments that can afford to lose the queue;
//! use `RedisStore` when the producer and workers run in separate processes.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::app::status::QueueCounts;
use crate::domain::{
    JobFailure, JobId, JobRecord, JobState, Lease, LeaseToken, WorkerId, add_duration,
};
use crate::error::{FerryError, Result};
use crate::ports::{ClaimedJob, Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// Entry in the pending heap.
///
/// Ordered so `BinaryHeap` acts as a min-heap on `run_at`, FIFO within the
/// same instant. Entries are never removed eagerly: a popped entry whose job
/// is no longer Queued at that `run_at` is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEntry {
    run_at: DateTime<Utc>,
    seq: u64,
    job_id: JobId,
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct StoreState {
    /// All job records (single source of truth).
    records: HashMap<JobId, JobRecord>,

    /// Queued job ids ordered by eligibility.
    pending: BinaryHeap<PendingEntry>,

    /// Ids of Running jobs; lease scans stay proportional to in-flight work.
    running: HashSet<JobId>,

    next_seq: u64,
}

impl StoreState {
    fn push_pending(&mut self, job_id: JobId, run_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(PendingEntry {
            run_at,
            seq,
            job_id,
        });
    }

    fn record_mut(&mut self, job_id: JobId) -> Result<&mut JobRecord> {
        self.records
            .get_mut(&job_id)
            .ok_or(FerryError::JobNotFound(job_id))
    }

    /// Move every lapsed lease back to Queued (or Failed on the last attempt).
    fn reap_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        let lapsed: Vec<JobId> = self
            .running
            .iter()
            .filter(|id| self.records.get(*id).is_some_and(|r| r.lease_lapsed(now)))
            .copied()
            .collect();

        for &job_id in &lapsed {
            self.running.remove(&job_id);
            let record = self.record_mut(job_id)?;
            let state = record.reclaim(now)?;
            tracing::info!(%job_id, attempt = record.attempt_count, %state, "reclaimed expired lease");
            if state == JobState::Queued {
                self.push_pending(job_id, now);
            }
        }
        Ok(lapsed)
    }

    /// Pop the first claimable job, if any is due at `now`.
    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<JobId> {
        loop {
            match self.pending.peek() {
                Some(entry) if entry.run_at <= now => {}
                _ => return None,
            }
            let entry = self.pending.pop()?;
            let live = self
                .records
                .get(&entry.job_id)
                .is_some_and(|r| r.is_claimable(now) && r.run_at == entry.run_at);
            if live {
                return Some(entry.job_id);
            }
        }
    }

    /// Earliest instant at which something may become claimable.
    fn next_wake(&self) -> Option<DateTime<Utc>> {
        let next_due = self.pending.peek().map(|e| e.run_at);
        let next_expiry = self
            .running
            .iter()
            .filter_map(|id| self.records.get(id)?.lease.as_ref().map(|l| l.expires_at))
            .min();
        match (next_due, next_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            counts.add(record.state);
        }
        counts
    }
}

/// In-memory `JobStore`.
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    lease_timeout: Duration,
}

impl InMemoryStore {
    pub fn new(lease_timeout: Duration) -> Self {
        Self::with_clock(lease_timeout, SystemClock)
    }

    /// Store reading time from `clock` (e.g. a `ManualClock` in tests).
    pub fn with_clock<C: Clock + Clone + 'static>(lease_timeout: Duration, clock: C) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            notify: Arc::new(Notify::new()),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock: Arc::new(clock),
            lease_timeout,
        }
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn submit(&self, job: JobRecord) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.records.contains_key(&job.id) {
                return Err(FerryError::InvalidTransition {
                    job_id: job.id,
                    from: job.state,
                    to: JobState::Queued,
                });
            }
            state.push_pending(job.id, job.run_at);
            state.records.insert(job.id, job);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn claim(&self, worker_id: WorkerId) -> Result<Option<ClaimedJob>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.reap_expired(now)?;

        let Some(job_id) = state.pop_due(now) else {
            return Ok(None);
        };
        let lease = Lease {
            token: self.ids.generate_lease_token(),
            worker_id,
            expires_at: add_duration(now, self.lease_timeout),
        };
        let token = lease.token;
        let expires_at = lease.expires_at;

        let record = state.record_mut(job_id)?;
        record.start_attempt(lease, now)?;
        let job = record.clone();
        state.running.insert(job_id);
        Ok(Some(ClaimedJob {
            job,
            token,
            expires_at,
        }))
    }

    async fn claim_wait(
        &self,
        worker_id: WorkerId,
        timeout: Duration,
    ) -> Result<Option<ClaimedJob>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a submit in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(claimed) = self.claim(worker_id).await? {
                return Ok(Some(claimed));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let mut wait = deadline - now;
            if let Some(wake_at) = self.state.lock().await.next_wake() {
                let until = (wake_at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
                wait = wait.min(until.max(Duration::from_millis(1)));
            }

            tokio::select! {
                _ = &mut notified => {},
                _ = tokio::time::sleep(wait) => {},
            }
        }
    }

    async fn complete(
        &self,
        job_id: JobId,
        token: LeaseToken,
        result: serde_json::Value,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let record = state.record_mut(job_id)?;
        record.check_lease(&token, now)?;
        record.mark_succeeded(result, now)?;
        state.running.remove(&job_id);
        Ok(())
    }

    async fn fail(
        &self,
        job_id: JobId,
        token: LeaseToken,
        failure: JobFailure,
        retry_after: Option<Duration>,
    ) -> Result<JobState> {
        let now = self.clock.now();
        let next = {
            let mut state = self.state.lock().await;
            let record = state.record_mut(job_id)?;
            record.check_lease(&token, now)?;
            let next = record.record_failure(failure, retry_after, now)?;
            let run_at = record.run_at;
            state.running.remove(&job_id);
            if next == JobState::Queued {
                state.push_pending(job_id, run_at);
            }
            next
        };
        if next == JobState::Queued {
            self.notify.notify_one();
        }
        Ok(next)
    }

    async fn heartbeat(&self, job_id: JobId, token: LeaseToken) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let record = state.record_mut(job_id)?;
        record.check_lease(&token, now)?;
        let expires_at = add_duration(now, self.lease_timeout);
        record.extend_lease(expires_at);
        Ok(expires_at)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.get(&job_id).cloned())
    }

    async fn reap_expired(&self) -> Result<Vec<JobId>> {
        let reaped = {
            let mut state = self.state.lock().await;
            state.reap_expired(self.clock.now())?
        };
        if !reaped.is_empty() {
            self.notify.notify_waiters();
        }
        Ok(reaped)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let state = self.state.lock().await;
        Ok(state.counts())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
