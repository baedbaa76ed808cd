//! Producer - the enqueue side of the queue.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{JobId, JobRecord, TaskName};
use crate::error::Result;
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};
use crate::typed::Task;

/// Builds job records and submits them to the store.
///
/// Cheap to clone; every request handler can hold its own copy.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    max_attempts: u32,
}

impl Producer {
    pub fn new(store: Arc<dyn JobStore>, max_attempts: u32) -> Self {
        Self::with_clock(store, max_attempts, SystemClock)
    }

    pub fn with_clock<C: Clock + Clone + 'static>(
        store: Arc<dyn JobStore>,
        max_attempts: u32,
        clock: C,
    ) -> Self {
        Self {
            store,
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock: Arc::new(clock),
            max_attempts,
        }
    }

    /// Enqueue one job and return its id.
    ///
    /// The name is validated here; whether a handler exists is only known to
    /// the worker. Each successful call creates exactly one job.
    pub async fn enqueue(&self, task_name: &str, payload: Value) -> Result<JobId> {
        let task_name = TaskName::new(task_name)?;
        let job = JobRecord::new(
            self.ids.generate_job_id(),
            task_name,
            payload,
            self.max_attempts,
            self.clock.now(),
        );
        let job_id = job.id;
        let task_name = job.task_name.clone();

        if let Err(err) = self.store.submit(job).await {
            tracing::warn!(%job_id, %task_name, error = %err, "enqueue failed");
            return Err(err);
        }
        tracing::info!(%job_id, %task_name, "job enqueued");
        Ok(job_id)
    }

    /// Enqueue a typed task under `T::NAME`.
    pub async fn enqueue_task<T: Task>(&self, task: &T) -> Result<JobId> {
        let payload = serde_json::to_value(task)?;
        self.enqueue(T::NAME, payload).await
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}
