//! Redis-backed job store.
//!
//! # Layout (all keys under `<namespace>:`)
//! - `job:<job-id>` (HASH): one job record, timestamps as epoch millis
//! - `queued` (ZSET): queued job ids scored by `run_at`
//! - `running` (ZSET): running job ids scored by lease expiry
//! - `count:succeeded`, `count:failed` (STRING): terminal counters
//!
//! Every transition after `submit` is a Lua script, so the check of the lease
//! token and the state change happen in one atomic step on the server. Time
//! comes from the store's `Clock` and is passed to the scripts as `ARGV`.
//!
//! Job hash keys are derived inside the scripts. On Redis Cluster the namespace
//! must be a hash tag (e.g. `{ferry}`) so every key lands in one slot.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::app::status::QueueCounts;
use crate::domain::{
    JobFailure, JobId, JobRecord, JobState, Lease, LeaseToken, TaskName, WorkerId, add_duration,
};
use crate::error::{FerryError, Result};
use crate::ports::{ClaimedJob, Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// Reclaims lapsed leases. Prepended to the scripts that need it.
const REAP_FN: &str = r#"
local function reap(prefix, now, lease_failure)
    local ids = redis.call('ZRANGEBYSCORE', prefix .. 'running', '-inf', '(' .. now)
    for _, id in ipairs(ids) do
        local key = prefix .. 'job:' .. id
        redis.call('ZREM', prefix .. 'running', id)
        redis.call('HDEL', key, 'lease_token', 'lease_worker', 'lease_expires_at')
        local attempts = tonumber(redis.call('HGET', key, 'attempt_count') or '0')
        local max = tonumber(redis.call('HGET', key, 'max_attempts') or '0')
        if attempts >= max then
            redis.call('HSET', key, 'state', 'failed', 'finished_at', now, 'error', lease_failure)
            redis.call('INCR', prefix .. 'count:failed')
        else
            redis.call('HSET', key, 'state', 'queued', 'run_at', now)
            redis.call('ZADD', prefix .. 'queued', now, id)
        end
    end
    return ids
end
"#;

/// True when `token` holds a live lease on the job at `now`.
const CHECK_LEASE_FN: &str = r#"
local function check_lease(key, token, now)
    if redis.call('HGET', key, 'state') ~= 'running' then return false end
    if redis.call('HGET', key, 'lease_token') ~= token then return false end
    local expires = tonumber(redis.call('HGET', key, 'lease_expires_at') or '')
    return expires ~= nil and expires >= tonumber(now)
end
"#;

// ARGV: prefix, now, lease_failure, token, worker, expires_at
const CLAIM_BODY: &str = r#"
local prefix, now = ARGV[1], ARGV[2]
reap(prefix, now, ARGV[3])
local ids = redis.call('ZRANGEBYSCORE', prefix .. 'queued', '-inf', now, 'LIMIT', 0, 1)
if #ids == 0 then return false end
local id = ids[1]
local key = prefix .. 'job:' .. id
redis.call('ZREM', prefix .. 'queued', id)
redis.call('HINCRBY', key, 'attempt_count', 1)
redis.call('HSET', key,
    'state', 'running',
    'started_at', now,
    'lease_token', ARGV[4],
    'lease_worker', ARGV[5],
    'lease_expires_at', ARGV[6])
redis.call('ZADD', prefix .. 'running', ARGV[6], id)
return redis.call('HGETALL', key)
"#;

// ARGV: prefix, id, token, now, result
const COMPLETE_BODY: &str = r#"
local prefix, id, now = ARGV[1], ARGV[2], ARGV[4]
local key = prefix .. 'job:' .. id
if redis.call('EXISTS', key) == 0 then return 'not_found' end
if not check_lease(key, ARGV[3], now) then return 'lease_expired' end
redis.call('ZREM', prefix .. 'running', id)
redis.call('HDEL', key, 'lease_token', 'lease_worker', 'lease_expires_at')
redis.call('HSET', key, 'state', 'succeeded', 'finished_at', now, 'result', ARGV[5])
redis.call('INCR', prefix .. 'count:succeeded')
return 'succeeded'
"#;

// ARGV: prefix, id, token, now, failure, retry_at ('' = no retry)
const FAIL_BODY: &str = r#"
local prefix, id, now, retry_at = ARGV[1], ARGV[2], ARGV[4], ARGV[6]
local key = prefix .. 'job:' .. id
if redis.call('EXISTS', key) == 0 then return 'not_found' end
if not check_lease(key, ARGV[3], now) then return 'lease_expired' end
redis.call('ZREM', prefix .. 'running', id)
redis.call('HDEL', key, 'lease_token', 'lease_worker', 'lease_expires_at')
local attempts = tonumber(redis.call('HGET', key, 'attempt_count') or '0')
local max = tonumber(redis.call('HGET', key, 'max_attempts') or '0')
if retry_at ~= '' and attempts < max then
    redis.call('HSET', key, 'state', 'queued', 'run_at', retry_at, 'error', ARGV[5])
    redis.call('ZADD', prefix .. 'queued', retry_at, id)
    return 'queued'
end
redis.call('HSET', key, 'state', 'failed', 'finished_at', now, 'error', ARGV[5])
redis.call('INCR', prefix .. 'count:failed')
return 'failed'
"#;

// ARGV: prefix, id, token, now, expires_at
const HEARTBEAT_BODY: &str = r#"
local prefix, id = ARGV[1], ARGV[2]
local key = prefix .. 'job:' .. id
if redis.call('EXISTS', key) == 0 then return 'not_found' end
if not check_lease(key, ARGV[3], ARGV[4]) then return 'lease_expired' end
redis.call('HSET', key, 'lease_expires_at', ARGV[5])
redis.call('ZADD', prefix .. 'running', ARGV[5], id)
return 'ok'
"#;

// ARGV: prefix, now, lease_failure
const REAP_BODY: &str = r#"
return reap(ARGV[1], ARGV[2], ARGV[3])
"#;

/// Namespaced key names.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(namespace: &str) -> Self {
        Self {
            prefix: format!("{namespace}:"),
        }
    }

    /// `<namespace>:`, handed to the scripts.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn job(&self, job_id: JobId) -> String {
        format!("{}job:{}", self.prefix, job_id)
    }

    pub fn queued(&self) -> String {
        format!("{}queued", self.prefix)
    }

    pub fn running(&self) -> String {
        format!("{}running", self.prefix)
    }

    pub fn succeeded_count(&self) -> String {
        format!("{}count:succeeded", self.prefix)
    }

    pub fn failed_count(&self) -> String {
        format!("{}count:failed", self.prefix)
    }
}

struct Scripts {
    claim: Script,
    complete: Script,
    fail: Script,
    heartbeat: Script,
    reap: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            claim: Script::new(&format!("{REAP_FN}{CLAIM_BODY}")),
            complete: Script::new(&format!("{CHECK_LEASE_FN}{COMPLETE_BODY}")),
            fail: Script::new(&format!("{CHECK_LEASE_FN}{FAIL_BODY}")),
            heartbeat: Script::new(&format!("{CHECK_LEASE_FN}{HEARTBEAT_BODY}")),
            reap: Script::new(&format!("{REAP_FN}{REAP_BODY}")),
        }
    }
}

/// `JobStore` shared by every producer and worker pointed at the same Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: RedisKeys,
    scripts: Arc<Scripts>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    lease_timeout: Duration,
    /// Serialized `JobFailure::lease_expired()`, written by the reaper.
    lease_failure: Arc<str>,
}

impl RedisStore {
    /// Connect and verify the server answers.
    pub async fn connect(address: &str, namespace: &str, lease_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(address).map_err(FerryError::store_unavailable)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(FerryError::store_unavailable)?;
        let store = Self::with_connection(conn, namespace, lease_timeout, SystemClock)?;
        store.ping().await?;
        tracing::info!(address, namespace, "connected to redis");
        Ok(store)
    }

    pub fn with_connection<C: Clock + Clone + 'static>(
        conn: ConnectionManager,
        namespace: &str,
        lease_timeout: Duration,
        clock: C,
    ) -> Result<Self> {
        let lease_failure = serde_json::to_string(&JobFailure::lease_expired())?;
        Ok(Self {
            conn,
            keys: RedisKeys::new(namespace),
            scripts: Arc::new(Scripts::load()),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock: Arc::new(clock),
            lease_timeout,
            lease_failure: lease_failure.into(),
        })
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    fn now_ms(&self) -> (DateTime<Utc>, i64) {
        let now = self.clock.now();
        (now, now.timestamp_millis())
    }
}

/// Map a script status to the caller's result.
fn script_status(job_id: JobId, status: &str) -> Result<()> {
    match status {
        "lease_expired" => Err(FerryError::LeaseExpired(job_id)),
        "not_found" => Err(FerryError::JobNotFound(job_id)),
        _ => Ok(()),
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn submit(&self, job: JobRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let fields = encode_record(&job)?;
        redis::pipe()
            .atomic()
            .hset_multiple(self.keys.job(job.id), &fields)
            .ignore()
            .zadd(self.keys.queued(), job.id.to_string(), job.run_at.timestamp_millis())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(FerryError::store_unavailable)
    }

    async fn claim(&self, worker_id: WorkerId) -> Result<Option<ClaimedJob>> {
        let mut conn = self.conn.clone();
        let (now, now_ms) = self.now_ms();
        let token = self.ids.generate_lease_token();
        let expires_at = add_duration(now, self.lease_timeout);

        let fields: Option<HashMap<String, String>> = self
            .scripts
            .claim
            .arg(self.keys.prefix())
            .arg(now_ms)
            .arg(&*self.lease_failure)
            .arg(token.to_string())
            .arg(worker_id.to_string())
            .arg(expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(FerryError::store_unavailable)?;

        let Some(fields) = fields else {
            return Ok(None);
        };
        let job = decode_record("claimed job", &fields)?;
        // Report the expiry as stored (millisecond precision).
        let expires_at = job.lease.as_ref().map_or(expires_at, |l| l.expires_at);
        Ok(Some(ClaimedJob {
            job,
            token,
            expires_at,
        }))
    }

    async fn complete(
        &self,
        job_id: JobId,
        token: LeaseToken,
        result: serde_json::Value,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let (_, now_ms) = self.now_ms();
        let status: String = self
            .scripts
            .complete
            .arg(self.keys.prefix())
            .arg(job_id.to_string())
            .arg(token.to_string())
            .arg(now_ms)
            .arg(serde_json::to_string(&result)?)
            .invoke_async(&mut conn)
            .await
            .map_err(FerryError::store_unavailable)?;
        script_status(job_id, &status)
    }

    async fn fail(
        &self,
        job_id: JobId,
        token: LeaseToken,
        failure: JobFailure,
        retry_after: Option<Duration>,
    ) -> Result<JobState> {
        let mut conn = self.conn.clone();
        let (now, now_ms) = self.now_ms();
        let retry_at = retry_after
            .map(|delay| add_duration(now, delay).timestamp_millis().to_string())
            .unwrap_or_default();

        let status: String = self
            .scripts
            .fail
            .arg(self.keys.prefix())
            .arg(job_id.to_string())
            .arg(token.to_string())
            .arg(now_ms)
            .arg(serde_json::to_string(&failure)?)
            .arg(retry_at)
            .invoke_async(&mut conn)
            .await
            .map_err(FerryError::store_unavailable)?;
        script_status(job_id, &status)?;
        JobState::from_str(&status).map_err(|reason| FerryError::CorruptRecord {
            key: self.keys.job(job_id),
            reason,
        })
    }

    async fn heartbeat(&self, job_id: JobId, token: LeaseToken) -> Result<DateTime<Utc>> {
        let mut conn = self.conn.clone();
        let (now, now_ms) = self.now_ms();
        let expires_at = add_duration(now, self.lease_timeout);
        let status: String = self
            .scripts
            .heartbeat
            .arg(self.keys.prefix())
            .arg(job_id.to_string())
            .arg(token.to_string())
            .arg(now_ms)
            .arg(expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(FerryError::store_unavailable)?;
        script_status(job_id, &status)?;
        Ok(expires_at)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let key = self.keys.job(job_id);
        let fields: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(FerryError::store_unavailable)?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_record(&key, &fields).map(Some)
    }

    async fn reap_expired(&self) -> Result<Vec<JobId>> {
        let mut conn = self.conn.clone();
        let (_, now_ms) = self.now_ms();
        let ids: Vec<String> = self
            .scripts
            .reap
            .arg(self.keys.prefix())
            .arg(now_ms)
            .arg(&*self.lease_failure)
            .invoke_async(&mut conn)
            .await
            .map_err(FerryError::store_unavailable)?;

        ids.iter()
            .map(|id| {
                id.parse().map_err(|e: crate::domain::ParseIdError| {
                    FerryError::CorruptRecord {
                        key: self.keys.running(),
                        reason: e.to_string(),
                    }
                })
            })
            .collect()
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let mut conn = self.conn.clone();
        let (queued, running, succeeded, failed): (usize, usize, Option<usize>, Option<usize>) =
            redis::pipe()
                .zcard(self.keys.queued())
                .zcard(self.keys.running())
                .get(self.keys.succeeded_count())
                .get(self.keys.failed_count())
                .query_async(&mut conn)
                .await
                .map_err(FerryError::store_unavailable)?;
        Ok(QueueCounts {
            queued,
            running,
            succeeded: succeeded.unwrap_or(0),
            failed: failed.unwrap_or(0),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(FerryError::store_unavailable)?;
        Ok(())
    }
}

// ========================================
// Hash encoding
// ========================================

fn encode_record(job: &JobRecord) -> Result<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("id", job.id.to_string()),
        ("task_name", job.task_name.to_string()),
        ("payload", serde_json::to_string(&job.payload)?),
        ("state", job.state.as_str().to_string()),
        ("enqueued_at", job.enqueued_at.timestamp_millis().to_string()),
        ("attempt_count", job.attempt_count.to_string()),
        ("max_attempts", job.max_attempts.to_string()),
        ("run_at", job.run_at.timestamp_millis().to_string()),
    ];
    if let Some(started_at) = job.started_at {
        fields.push(("started_at", started_at.timestamp_millis().to_string()));
    }
    if let Some(finished_at) = job.finished_at {
        fields.push(("finished_at", finished_at.timestamp_millis().to_string()));
    }
    if let Some(lease) = &job.lease {
        fields.push(("lease_token", lease.token.to_string()));
        fields.push(("lease_worker", lease.worker_id.to_string()));
        fields.push(("lease_expires_at", lease.expires_at.timestamp_millis().to_string()));
    }
    if let Some(result) = &job.result {
        fields.push(("result", serde_json::to_string(result)?));
    }
    if let Some(error) = &job.error {
        fields.push(("error", serde_json::to_string(error)?));
    }
    Ok(fields)
}

/// Typed access to a job hash.
struct Fields<'a> {
    key: &'a str,
    map: &'a HashMap<String, String>,
}

impl Fields<'_> {
    fn corrupt(&self, reason: impl Into<String>) -> FerryError {
        FerryError::CorruptRecord {
            key: self.key.to_string(),
            reason: reason.into(),
        }
    }

    fn optional(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.optional(name)
            .ok_or_else(|| self.corrupt(format!("missing field {name}")))
    }

    fn parse<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.required(name)?
            .parse()
            .map_err(|e: T::Err| self.corrupt(format!("field {name}: {e}")))
    }

    fn timestamp(&self, name: &str) -> Result<DateTime<Utc>> {
        let ms: i64 = self.parse(name)?;
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| self.corrupt(format!("field {name}: timestamp out of range")))
    }

    fn optional_timestamp(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        match self.optional(name) {
            Some(_) => self.timestamp(name).map(Some),
            None => Ok(None),
        }
    }

    fn json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.optional(name)
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| self.corrupt(format!("field {name}: {e}")))
    }
}

fn decode_record(key: &str, map: &HashMap<String, String>) -> Result<JobRecord> {
    let f = Fields { key, map };

    let lease = match f.optional("lease_token") {
        Some(_) => Some(Lease {
            token: f.parse("lease_token")?,
            worker_id: f.parse("lease_worker")?,
            expires_at: f.timestamp("lease_expires_at")?,
        }),
        None => None,
    };

    Ok(JobRecord {
        id: f.parse("id")?,
        task_name: TaskName::new(f.required("task_name")?)?,
        payload: f.json("payload")?.unwrap_or(serde_json::Value::Null),
        state: f.parse("state")?,
        enqueued_at: f.timestamp("enqueued_at")?,
        started_at: f.optional_timestamp("started_at")?,
        finished_at: f.optional_timestamp("finished_at")?,
        attempt_count: f.parse("attempt_count")?,
        max_attempts: f.parse("max_attempts")?,
        run_at: f.timestamp("run_at")?,
        lease,
        result: f.json("result")?,
        error: f.json("error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    fn to_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn millis(t: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap()
    }

    #[test]
    fn keys_are_namespaced() {
        let keys = RedisKeys::new("ferry");
        let id = JobId::generate();
        assert_eq!(keys.prefix(), "ferry:");
        assert_eq!(keys.queued(), "ferry:queued");
        assert_eq!(keys.running(), "ferry:running");
        assert_eq!(keys.job(id), format!("ferry:job:{id}"));
    }

    #[test]
    fn queued_record_survives_the_hash() {
        let now = millis(Utc::now());
        let job = JobRecord::new(
            JobId::generate(),
            TaskName::new("echo").unwrap(),
            serde_json::json!({"msg": "hi"}),
            3,
            now,
        );
        let decoded = decode_record("k", &to_map(encode_record(&job).unwrap())).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn running_record_keeps_its_lease() {
        let now = millis(Utc::now());
        let mut job = JobRecord::new(
            JobId::generate(),
            TaskName::new("echo").unwrap(),
            serde_json::Value::Null,
            3,
            now,
        );
        job.start_attempt(
            Lease {
                token: LeaseToken::generate(),
                worker_id: WorkerId::generate(),
                expires_at: millis(add_duration(now, Duration::from_secs(30))),
            },
            now,
        )
        .unwrap();
        job.error = Some(JobFailure::transient("earlier attempt"));

        let decoded = decode_record("k", &to_map(encode_record(&job).unwrap())).unwrap();
        assert_eq!(decoded.lease, job.lease);
        assert_eq!(decoded.attempt_count, 1);
        assert_eq!(decoded.error.unwrap().kind, ErrorKind::Transient);
    }

    #[test]
    fn missing_field_is_reported_as_corrupt() {
        let mut map = HashMap::new();
        map.insert("id".to_string(), JobId::generate().to_string());
        let err = decode_record("ferry:job:x", &map).unwrap_err();
        assert!(matches!(err, FerryError::CorruptRecord { ref key, .. } if key == "ferry:job:x"));
    }

    #[test]
    fn undecodable_json_field_is_reported_as_corrupt() {
        let job = JobRecord::new(
            JobId::generate(),
            TaskName::new("echo").unwrap(),
            serde_json::Value::Null,
            3,
            Utc::now(),
        );
        let mut map = to_map(encode_record(&job).unwrap());
        map.insert("error".to_string(), "{not json".to_string());

        let err = decode_record("ferry:job:x", &map).unwrap_err();
        assert!(matches!(
            err,
            FerryError::CorruptRecord { ref key, ref reason } if key == "ferry:job:x" && reason.contains("error")
        ));
    }

    #[test]
    fn script_statuses_map_to_errors() {
        let id = JobId::generate();
        assert!(script_status(id, "succeeded").is_ok());
        assert!(matches!(
            script_status(id, "lease_expired"),
            Err(FerryError::LeaseExpired(_))
        ));
        assert!(matches!(
            script_status(id, "not_found"),
            Err(FerryError::JobNotFound(_))
        ));
    }

    // Live tests: FERRY_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored

    async fn live_store() -> RedisStore {
        let url = std::env::var("FERRY_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let namespace = format!("ferry-test-{}", ulid::Ulid::new());
        RedisStore::connect(&url, &namespace, Duration::from_secs(30))
            .await
            .unwrap()
    }

    fn echo_job(now: DateTime<Utc>) -> JobRecord {
        JobRecord::new(
            JobId::generate(),
            TaskName::new("echo").unwrap(),
            serde_json::json!("hi"),
            3,
            now,
        )
    }

    #[tokio::test]
    #[ignore = "needs a running redis"]
    async fn live_claim_then_complete() {
        let store = live_store().await;
        let job = echo_job(Utc::now());
        let id = job.id;
        store.submit(job).await.unwrap();

        let claimed = store.claim(WorkerId::generate()).await.unwrap().unwrap();
        assert_eq!(claimed.job.id, id);
        assert_eq!(claimed.job.attempt_count, 1);
        assert!(store.claim(WorkerId::generate()).await.unwrap().is_none());

        let err = store
            .complete(id, LeaseToken::generate(), serde_json::json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::LeaseExpired(_)));

        store
            .complete(id, claimed.token, serde_json::json!("hi"))
            .await
            .unwrap();
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Succeeded);
        assert_eq!(record.result, Some(serde_json::json!("hi")));
        assert_eq!(store.counts().await.unwrap().succeeded, 1);
    }

    #[tokio::test]
    #[ignore = "needs a running redis"]
    async fn live_transient_failure_requeues() {
        let store = live_store().await;
        let job = echo_job(Utc::now());
        let id = job.id;
        store.submit(job).await.unwrap();

        let claimed = store.claim(WorkerId::generate()).await.unwrap().unwrap();
        let next = store
            .fail(id, claimed.token, JobFailure::transient("boom"), Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(next, JobState::Queued);

        let again = store.claim(WorkerId::generate()).await.unwrap().unwrap();
        assert_eq!(again.job.attempt_count, 2);
    }

    #[tokio::test]
    #[ignore = "needs a running redis"]
    async fn live_heartbeat_and_reap() {
        let url = std::env::var("FERRY_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let client = redis::Client::open(url).unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        let clock = crate::ports::ManualClock::default();
        let namespace = format!("ferry-test-{}", ulid::Ulid::new());
        let store =
            RedisStore::with_connection(conn, &namespace, Duration::from_secs(30), clock.clone())
                .unwrap();

        let job = echo_job(clock.now());
        let id = job.id;
        store.submit(job).await.unwrap();
        let claimed = store.claim(WorkerId::generate()).await.unwrap().unwrap();

        clock.advance(Duration::from_secs(20));
        store.heartbeat(id, claimed.token).await.unwrap();
        clock.advance(Duration::from_secs(20));
        assert!(store.reap_expired().await.unwrap().is_empty());

        clock.advance(Duration::from_secs(20));
        assert_eq!(store.reap_expired().await.unwrap(), vec![id]);
        assert!(store.reap_expired().await.unwrap().is_empty());

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.attempt_count, 1);
    }
}
