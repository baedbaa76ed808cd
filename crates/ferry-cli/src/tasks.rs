//! Built-in demo handlers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use ferry_core::{HandlerError, JobContext, JobHandler, WorkerBuilder, WorkerSettings, handler_fn};

pub const ECHO: &str = "echo";
pub const BACKGROUND_TASK: &str = "background_task";

/// Sleeps, then reports which job finished.
///
/// `{"duration_ms": n}` in the payload overrides the default sleep.
pub struct BackgroundTask {
    default_duration: Duration,
}

impl BackgroundTask {
    pub fn new(default_duration: Duration) -> Self {
        Self { default_duration }
    }

    fn duration_for(&self, payload: &Value) -> Duration {
        payload
            .get("duration_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(self.default_duration)
    }
}

impl Default for BackgroundTask {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl JobHandler for BackgroundTask {
    async fn handle(&self, ctx: JobContext, payload: Value) -> Result<Value, HandlerError> {
        let duration = self.duration_for(&payload);
        tracing::debug!(job_id = %ctx.job_id, ?duration, "background_task sleeping");
        tokio::time::sleep(duration).await;
        Ok(json!(format!("Job {} completed", ctx.job_id)))
    }
}

/// Builder with every built-in handler registered and expected.
pub fn builder(settings: WorkerSettings) -> ferry_core::Result<WorkerBuilder> {
    Ok(WorkerBuilder::new()
        .register(
            ECHO,
            handler_fn(|_ctx, payload| async move { Ok::<_, HandlerError>(payload) }),
        )?
        .register(BACKGROUND_TASK, BackgroundTask::default())?
        .expect_tasks(&[ECHO, BACKGROUND_TASK])
        .settings(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::domain::{JobId, TaskName};

    fn ctx(task: &str) -> JobContext {
        JobContext {
            job_id: JobId::generate(),
            task_name: TaskName::new(task).unwrap(),
            attempt: 1,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn background_task_reports_its_job() {
        let ctx = ctx(BACKGROUND_TASK);
        let expected = format!("Job {} completed", ctx.job_id);
        let out = BackgroundTask::default()
            .handle(ctx, json!({"duration_ms": 5}))
            .await
            .unwrap();
        assert_eq!(out, json!(expected));
    }

    #[test]
    fn duration_falls_back_to_default() {
        let task = BackgroundTask::new(Duration::from_millis(7));
        assert_eq!(task.duration_for(&Value::Null), Duration::from_millis(7));
        assert_eq!(task.duration_for(&json!({"duration_ms": "soon"})), Duration::from_millis(7));
        assert_eq!(task.duration_for(&json!({"duration_ms": 20})), Duration::from_millis(20));
    }

    #[test]
    fn builder_registers_every_builtin() {
        let app = builder(WorkerSettings::default()).unwrap().build().unwrap();
        assert_eq!(app.registry.registered_names(), vec![BACKGROUND_TASK, ECHO]);
    }
}
