//! Worker loop - claim -> resolve -> run -> report.
//!
//! Each `Worker` runs one job at a time. `WorkerGroup` spawns several on the
//! tokio runtime and stops them through a shared `watch` channel.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::domain::{Backoff, JobFailure, JobId, JobState, RetryPolicy, WorkerId};
use crate::error::{FerryError, Result};
use crate::ports::{ClaimedJob, JobStore};
use crate::typed::{HandlerError, JobContext, TaskRegistry};

/// Backoff after consecutive store errors while claiming.
const STORE_BACKOFF: Backoff = Backoff::Exponential {
    base: Duration::from_millis(100),
    multiplier: 2.0,
    max: Duration::from_secs(5),
};

/// Tries per outcome report before leaving the job to lease expiry.
const REPORT_ATTEMPTS: u32 = 3;

/// What happens to an in-flight job when shutdown is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let the handler finish and report its outcome.
    #[default]
    Drain,
    /// Stop at once; the job is re-run after its lease lapses.
    Abort,
}

impl FromStr for ShutdownMode {
    type Err = FerryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "drain" => Ok(ShutdownMode::Drain),
            "abort" => Ok(ShutdownMode::Abort),
            other => Err(FerryError::Config(format!(
                "unknown shutdown mode {other:?} (expected drain or abort)"
            ))),
        }
    }
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownMode::Drain => "drain",
            ShutdownMode::Abort => "abort",
        })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// How long one blocking claim waits before the loop checks in again.
    pub claim_timeout: Duration,
    /// Must be shorter than the store's lease timeout.
    pub heartbeat_interval: Duration,
    pub backoff: Backoff,
    pub shutdown_mode: ShutdownMode,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            claim_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
            backoff: Backoff::Fixed(Duration::from_secs(1)),
            shutdown_mode: ShutdownMode::Drain,
        }
    }
}

/// How supervising a running handler ended.
enum Supervised {
    Finished(std::result::Result<serde_json::Value, HandlerError>),
    /// The store no longer recognises our lease.
    LeaseLost,
    /// Shutdown in abort mode.
    Aborted,
}

pub struct Worker {
    id: WorkerId,
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>, settings: WorkerSettings) -> Self {
        Self {
            id: WorkerId::generate(),
            store,
            registry,
            settings,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    ///
    /// A stop request takes effect between claims, so it can lag by up to
    /// `claim_timeout`. A job claimed in that window is still processed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.id, mode = %self.settings.shutdown_mode, "worker started");
        let mut store_errors: u32 = 0;

        loop {
            // Err: the sender is gone.
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            // Never raced against shutdown: a claim can commit before it replies.
            let claimed = self
                .store
                .claim_wait(self.id, self.settings.claim_timeout)
                .await;

            match claimed {
                Ok(Some(claimed)) => {
                    store_errors = 0;
                    self.process(claimed, &mut shutdown).await;
                }
                Ok(None) => store_errors = 0,
                Err(err) => {
                    store_errors += 1;
                    let delay = STORE_BACKOFF.delay(store_errors);
                    tracing::warn!(
                        worker_id = %self.id,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "claim failed"
                    );
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.id, "worker stopped");
    }

    /// Claim and process at most one job without waiting. Returns its id.
    pub async fn run_once(&self) -> Result<Option<JobId>> {
        let Some(claimed) = self.store.claim(self.id).await? else {
            return Ok(None);
        };
        let job_id = claimed.job.id;
        // Never changes, so an abort-mode worker cannot be interrupted here.
        let (_tx, mut rx) = watch::channel(false);
        self.process(claimed, &mut rx).await;
        Ok(Some(job_id))
    }

    async fn process(&self, claimed: ClaimedJob, shutdown: &mut watch::Receiver<bool>) {
        let job = &claimed.job;
        tracing::debug!(
            worker_id = %self.id,
            job_id = %job.id,
            task_name = %job.task_name,
            attempt = job.attempt_count,
            "processing job"
        );

        let Some(handler) = self.registry.resolve(job.task_name.as_str()) else {
            tracing::warn!(
                worker_id = %self.id,
                job_id = %job.id,
                task_name = %job.task_name,
                "no handler registered, failing job"
            );
            self.report_failure(&claimed, JobFailure::unknown_task(&job.task_name))
                .await;
            return;
        };

        let ctx = JobContext {
            job_id: job.id,
            task_name: job.task_name.clone(),
            attempt: job.attempt_count,
            max_attempts: job.max_attempts,
        };
        let payload = job.payload.clone();
        let started = Instant::now();
        let handle = tokio::spawn(async move { handler.handle(ctx, payload).await });

        match self.supervise(handle, &claimed, shutdown).await {
            Supervised::Finished(Ok(result)) => {
                tracing::info!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    task_name = %job.task_name,
                    attempt = job.attempt_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job succeeded"
                );
                self.report_success(&claimed, result).await;
            }
            Supervised::Finished(Err(err)) => {
                self.report_failure(&claimed, err.into_failure()).await;
            }
            Supervised::LeaseLost => {
                tracing::debug!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    "lease lost while running, abandoning job"
                );
            }
            Supervised::Aborted => {
                tracing::info!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    "shutdown requested, leaving job to lease expiry"
                );
            }
        }
    }

    /// Wait for the handler while keeping the lease alive.
    async fn supervise(
        &self,
        mut handle: JoinHandle<std::result::Result<serde_json::Value, HandlerError>>,
        claimed: &ClaimedJob,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Supervised {
        let every = self.settings.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let abort_on_shutdown = self.settings.shutdown_mode == ShutdownMode::Abort;

        loop {
            tokio::select! {
                joined = &mut handle => return Supervised::Finished(flatten_join(joined)),
                _ = ticker.tick() => {
                    match self.store.heartbeat(claimed.job.id, claimed.token).await {
                        Ok(expires_at) => tracing::trace!(
                            job_id = %claimed.job.id,
                            %expires_at,
                            "lease extended"
                        ),
                        Err(FerryError::LeaseExpired(_) | FerryError::JobNotFound(_)) => {
                            handle.abort();
                            return Supervised::LeaseLost;
                        }
                        Err(err) => tracing::warn!(
                            worker_id = %self.id,
                            job_id = %claimed.job.id,
                            error = %err,
                            "heartbeat failed"
                        ),
                    }
                }
                _ = shutdown.changed(), if abort_on_shutdown => {
                    handle.abort();
                    return Supervised::Aborted;
                }
            }
        }
    }

    async fn report_success(&self, claimed: &ClaimedJob, result: serde_json::Value) {
        let job_id = claimed.job.id;
        for attempt in 1..=REPORT_ATTEMPTS {
            match self.store.complete(job_id, claimed.token, result.clone()).await {
                Ok(()) => return,
                Err(err) if !self.should_retry_report(job_id, &err, attempt) => return,
                Err(_) => tokio::time::sleep(STORE_BACKOFF.delay(attempt)).await,
            }
        }
    }

    async fn report_failure(&self, claimed: &ClaimedJob, failure: JobFailure) {
        let job = &claimed.job;
        let retry_after = RetryPolicy::new(job.max_attempts, self.settings.backoff.clone())
            .retry_after(job.attempt_count, failure.kind);

        for attempt in 1..=REPORT_ATTEMPTS {
            match self
                .store
                .fail(job.id, claimed.token, failure.clone(), retry_after)
                .await
            {
                Ok(state) => {
                    log_failure(self.id, claimed, &failure, state, retry_after);
                    return;
                }
                Err(err) if !self.should_retry_report(job.id, &err, attempt) => return,
                Err(_) => tokio::time::sleep(STORE_BACKOFF.delay(attempt)).await,
            }
        }
    }

    fn should_retry_report(&self, job_id: JobId, err: &FerryError, attempt: u32) -> bool {
        match err {
            FerryError::LeaseExpired(_) | FerryError::JobNotFound(_) => {
                tracing::debug!(worker_id = %self.id, %job_id, "lease gone before report, dropping outcome");
                false
            }
            err if err.is_transient() && attempt < REPORT_ATTEMPTS => {
                tracing::warn!(worker_id = %self.id, %job_id, error = %err, attempt, "report failed, retrying");
                true
            }
            err => {
                tracing::error!(
                    worker_id = %self.id,
                    %job_id,
                    error = %err,
                    "could not report outcome, job will be retried after lease expiry"
                );
                false
            }
        }
    }
}

fn log_failure(
    worker_id: WorkerId,
    claimed: &ClaimedJob,
    failure: &JobFailure,
    state: JobState,
    retry_after: Option<Duration>,
) {
    let job = &claimed.job;
    if state == JobState::Queued {
        tracing::info!(
            %worker_id,
            job_id = %job.id,
            task_name = %job.task_name,
            attempt = job.attempt_count,
            retry_in_ms = retry_after.map_or(0, |d| d.as_millis() as u64),
            error = %failure.message,
            "job failed, retry scheduled"
        );
    } else {
        tracing::warn!(
            %worker_id,
            job_id = %job.id,
            task_name = %job.task_name,
            attempt = job.attempt_count,
            kind = ?failure.kind,
            error = %failure.message,
            "job failed"
        );
    }
}

/// A panicking handler counts as a permanent failure.
fn flatten_join(
    joined: std::result::Result<std::result::Result<serde_json::Value, HandlerError>, JoinError>,
) -> std::result::Result<serde_json::Value, HandlerError> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(HandlerError::permanent(format!(
            "handler panicked: {}",
            panic_message(err.into_panic().as_ref())
        ))),
        Err(err) => Err(HandlerError::permanent(format!("handler task failed: {err}"))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Handle to a set of spawned workers.
/// - `request_shutdown` stops new claims on every worker
/// - `shutdown_and_join` also waits for them to exit
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one store and registry.
    pub fn spawn(
        n: usize,
        store: Arc<dyn JobStore>,
        registry: Arc<TaskRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|_| {
                let worker = Worker::new(Arc::clone(&store), Arc::clone(&registry), settings.clone());
                let rx = shutdown_rx.clone();
                tokio::spawn(async move { worker.run(rx).await })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Receiver that flips with this group's shutdown, for companion loops.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, JobRecord, TaskName};
    use crate::impls::InMemoryStore;
    use crate::typed::handler_fn;
    use rstest::rstest;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> WorkerSettings {
        WorkerSettings {
            claim_timeout: Duration::from_millis(50),
            heartbeat_interval: Duration::from_millis(20),
            backoff: Backoff::Fixed(Duration::ZERO),
            shutdown_mode: ShutdownMode::Drain,
        }
    }

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register("echo", handler_fn(|_ctx, payload| async move { Ok::<_, HandlerError>(payload) }))
            .unwrap();
        registry
            .register(
                "always_fails",
                handler_fn(|_ctx, _payload| async move {
                    Err::<Value, _>(HandlerError::transient("try again"))
                }),
            )
            .unwrap();
        registry
            .register(
                "rejects",
                handler_fn(|_ctx, _payload| async move {
                    Err::<Value, _>(HandlerError::permanent("bad input"))
                }),
            )
            .unwrap();
        registry
            .register(
                "panics",
                handler_fn(|_ctx, _payload| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok::<Value, HandlerError>(Value::Null)
                }),
            )
            .unwrap();
        registry
    }

    async fn submit(store: &InMemoryStore, task: &str, payload: Value, max_attempts: u32) -> JobId {
        let job = JobRecord::new(
            JobId::generate(),
            TaskName::new(task).unwrap(),
            payload,
            max_attempts,
            chrono::Utc::now(),
        );
        let id = job.id;
        store.submit(job).await.unwrap();
        id
    }

    fn worker(store: &Arc<InMemoryStore>, registry: TaskRegistry) -> Worker {
        let store: Arc<dyn JobStore> = Arc::clone(store) as Arc<dyn JobStore>;
        Worker::new(store, Arc::new(registry), settings())
    }

    #[rstest]
    #[case("drain", ShutdownMode::Drain)]
    #[case("ABORT", ShutdownMode::Abort)]
    fn shutdown_mode_parses(#[case] raw: &str, #[case] expected: ShutdownMode) {
        assert_eq!(raw.parse::<ShutdownMode>().unwrap(), expected);
    }

    #[test]
    fn unknown_shutdown_mode_is_a_config_error() {
        assert!(matches!("later".parse::<ShutdownMode>(), Err(FerryError::Config(_))));
    }

    #[tokio::test]
    async fn echo_succeeds_with_its_payload() {
        let store = Arc::new(InMemoryStore::new(Duration::from_secs(30)));
        let id = submit(&store, "echo", json!("hi"), 3).await;

        let w = worker(&store, registry());
        assert_eq!(w.run_once().await.unwrap(), Some(id));

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.result, Some(json!("hi")));
        assert_eq!(job.attempt_count, 1);
    }

    #[tokio::test]
    async fn unknown_task_fails_on_first_attempt() {
        let store = Arc::new(InMemoryStore::new(Duration::from_secs(30)));
        let id = submit(&store, "unregistered_task", json!(null), 3).await;

        worker(&store, registry()).run_once().await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.error.unwrap().kind, ErrorKind::UnknownTask);
    }

    #[tokio::test]
    async fn transient_failures_stop_at_max_attempts() {
        let store = Arc::new(InMemoryStore::new(Duration::from_secs(30)));
        let id = submit(&store, "always_fails", json!(null), 3).await;
        let w = worker(&store, registry());

        for _ in 0..3 {
            assert_eq!(w.run_once().await.unwrap(), Some(id));
        }
        assert_eq!(w.run_once().await.unwrap(), None);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 3);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Transient);
    }

    #[rstest]
    #[case("rejects", "bad input")]
    #[case("panics", "boom")]
    #[tokio::test]
    async fn permanent_failures_do_not_retry(#[case] task: &str, #[case] message: &str) {
        let store = Arc::new(InMemoryStore::new(Duration::from_secs(30)));
        let id = submit(&store, task, json!(null), 3).await;

        worker(&store, registry()).run_once().await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 1);
        let error = job.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Permanent);
        assert!(error.message.contains(message));
    }

    #[tokio::test]
    async fn heartbeats_keep_a_slow_job_alive() {
        // Lease shorter than the handler; only heartbeats keep it.
        let store = Arc::new(InMemoryStore::new(Duration::from_millis(60)));
        let mut registry = TaskRegistry::new();
        registry
            .register(
                "slow",
                handler_fn(|_ctx, _payload| async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, HandlerError>(json!("done"))
                }),
            )
            .unwrap();
        let id = submit(&store, "slow", json!(null), 3).await;

        worker(&store, registry).run_once().await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempt_count, 1);
    }

    #[tokio::test]
    async fn group_drains_in_flight_jobs_on_shutdown() {
        let store = Arc::new(InMemoryStore::new(Duration::from_secs(30)));
        let runs = Arc::new(AtomicU32::new(0));
        let mut registry = TaskRegistry::new();
        registry
            .register("count", {
                let runs = Arc::clone(&runs);
                handler_fn(move |_ctx, _payload| {
                    let runs = Arc::clone(&runs);
                    async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, HandlerError>(Value::Null)
                    }
                })
            })
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(submit(&store, "count", json!(null), 3).await);
        }

        let dyn_store: Arc<dyn JobStore> = Arc::clone(&store) as Arc<dyn JobStore>;
        let group = WorkerGroup::spawn(2, dyn_store, Arc::new(registry), settings());
        assert_eq!(group.len(), 2);

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.counts().await.unwrap().succeeded < 5 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        group.shutdown_and_join().await;

        assert_eq!(runs.load(Ordering::SeqCst), 5);
        for id in ids {
            assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Succeeded);
        }
    }

    #[tokio::test]
    async fn abort_leaves_the_job_running() {
        let store = Arc::new(InMemoryStore::new(Duration::from_secs(30)));
        let mut registry = TaskRegistry::new();
        registry
            .register(
                "forever",
                handler_fn(|_ctx, _payload| async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, HandlerError>(Value::Null)
                }),
            )
            .unwrap();
        let id = submit(&store, "forever", json!(null), 3).await;

        let dyn_store: Arc<dyn JobStore> = Arc::clone(&store) as Arc<dyn JobStore>;
        let settings = WorkerSettings {
            shutdown_mode: ShutdownMode::Abort,
            ..settings()
        };
        let group = WorkerGroup::spawn(1, dyn_store, Arc::new(registry), settings);

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.counts().await.unwrap().running < 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::timeout(Duration::from_secs(5), group.shutdown_and_join())
            .await
            .unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.lease.is_some());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(s.as_ref()), "non-string panic payload");
    }
}
