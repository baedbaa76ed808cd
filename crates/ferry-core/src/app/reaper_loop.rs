//! ReaperLoop - reclaims lapsed leases in the background.
//!
//! `claim` already reaps before picking a job, so the loop is not needed for
//! correctness. It makes stalled jobs show up as Queued (or Failed) even while
//! no worker is claiming, and logs queue counts on each pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::domain::JobId;
use crate::error::Result;
use crate::ports::JobStore;

pub struct ReaperLoop {
    store: Arc<dyn JobStore>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "reaper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "reaper pass failed");
                    }
                }
            }
        }

        tracing::debug!("reaper stopped");
    }

    /// One pass: reclaim, then log counts.
    pub async fn tick(&self) -> Result<Vec<JobId>> {
        let reaped = self.store.reap_expired().await?;
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "reclaimed expired leases");
        }

        let counts = self.store.counts().await?;
        tracing::debug!(
            queued = counts.queued,
            running = counts.running,
            succeeded = counts.succeeded,
            failed = counts.failed,
            "queue counts"
        );
        Ok(reaped)
    }
}
