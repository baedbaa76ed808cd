//! Runtime configuration.
//!
//! Every setting has a default and a `FERRY_*` environment variable. Durations
//! are given in milliseconds.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::app::{ShutdownMode, WorkerSettings};
use crate::domain::{Backoff, RetryPolicy};
use crate::error::{FerryError, Result};

pub const DEFAULT_STORE_ADDRESS: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Cap for exponential retry backoff when none is configured.
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct FerryConfig {
    /// `redis://...` for the shared store, `memory://` for an in-process one.
    pub store_address: String,
    /// Key prefix inside the store.
    pub namespace: String,
    pub max_attempts: u32,
    pub lease_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub retry_backoff: Backoff,
    pub claim_timeout: Duration,
    /// Worker loops per process.
    pub workers: usize,
    pub reaper_interval: Duration,
    pub http_addr: SocketAddr,
    pub shutdown_mode: ShutdownMode,
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            store_address: DEFAULT_STORE_ADDRESS.to_string(),
            namespace: "ferry".to_string(),
            max_attempts: 3,
            lease_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            retry_backoff: Backoff::Fixed(DEFAULT_RETRY_BACKOFF),
            claim_timeout: Duration::from_secs(5),
            workers: 1,
            reaper_interval: Duration::from_secs(5),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            shutdown_mode: ShutdownMode::Drain,
        }
    }
}

impl FerryConfig {
    /// Defaults overridden by the process environment, then validated.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let retry_base = env
            .millis("FERRY_RETRY_BACKOFF_MS")?
            .unwrap_or(DEFAULT_RETRY_BACKOFF);
        let retry_backoff = match env.parse::<f64>("FERRY_RETRY_MULTIPLIER")? {
            Some(multiplier) => Backoff::Exponential {
                base: retry_base,
                multiplier,
                max: env
                    .millis("FERRY_RETRY_MAX_DELAY_MS")?
                    .unwrap_or(DEFAULT_RETRY_MAX_DELAY),
            },
            None => Backoff::Fixed(retry_base),
        };

        let config = Self {
            store_address: env.string("FERRY_STORE_ADDRESS").unwrap_or(defaults.store_address),
            namespace: env.string("FERRY_NAMESPACE").unwrap_or(defaults.namespace),
            max_attempts: env.parse("FERRY_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            lease_timeout: env.millis("FERRY_LEASE_TIMEOUT_MS")?.unwrap_or(defaults.lease_timeout),
            heartbeat_interval: env
                .millis("FERRY_HEARTBEAT_INTERVAL_MS")?
                .unwrap_or(defaults.heartbeat_interval),
            retry_backoff,
            claim_timeout: env.millis("FERRY_CLAIM_TIMEOUT_MS")?.unwrap_or(defaults.claim_timeout),
            workers: env.parse("FERRY_WORKERS")?.unwrap_or(defaults.workers),
            reaper_interval: env
                .millis("FERRY_REAPER_INTERVAL_MS")?
                .unwrap_or(defaults.reaper_interval),
            http_addr: env.parse("FERRY_HTTP_ADDR")?.unwrap_or(defaults.http_addr),
            shutdown_mode: env.parse("FERRY_SHUTDOWN_MODE")?.unwrap_or(defaults.shutdown_mode),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(FerryError::Config(msg));

        if self.store_address.is_empty() {
            return invalid("store_address must not be empty".into());
        }
        if self.max_attempts < 1 {
            return invalid("max_attempts must be at least 1".into());
        }
        if self.workers < 1 {
            return invalid("workers must be at least 1".into());
        }
        for (name, value) in [
            ("lease_timeout", self.lease_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("claim_timeout", self.claim_timeout),
            ("reaper_interval", self.reaper_interval),
        ] {
            if value.is_zero() {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        if self.heartbeat_interval >= self.lease_timeout {
            return invalid(format!(
                "heartbeat_interval ({:?}) must be shorter than lease_timeout ({:?})",
                self.heartbeat_interval, self.lease_timeout
            ));
        }
        if let Backoff::Exponential { multiplier, .. } = self.retry_backoff {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return invalid(format!("retry multiplier must be >= 1.0, got {multiplier}"));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_backoff.clone())
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            claim_timeout: self.claim_timeout,
            heartbeat_interval: self.heartbeat_interval,
            backoff: self.retry_backoff.clone(),
            shutdown_mode: self.shutdown_mode,
        }
    }

    /// `memory://` selects the in-process store.
    pub fn uses_memory_store(&self) -> bool {
        self.store_address.starts_with("memory://")
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| FerryError::Config(format!("{key}={raw:?}: {e}")))
            })
            .transpose()
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}
