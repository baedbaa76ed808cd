//! WorkerBuilder - wires a registry and settings into runnable workers.
//!
//! `expect_tasks` makes a worker refuse to start when a handler it is supposed
//! to serve was never registered, instead of failing every such job with
//! `UnknownTask` later.

use std::sync::Arc;

use super::worker_loop::{Worker, WorkerGroup, WorkerSettings};
use crate::error::{FerryError, Result};
use crate::ports::JobStore;
use crate::typed::{Handler, JobHandler, Task, TaskRegistry};

/// ```ignore
/// let app = WorkerBuilder::new()
///     .register("echo", EchoHandler)?
///     .register_task::<SendEmail, _>(SendEmailHandler)?
///     .expect_tasks(&["echo", SendEmail::NAME])
///     .build()?;
/// let group = app.spawn(4, store);
/// ```
#[derive(Default)]
pub struct WorkerBuilder {
    registry: TaskRegistry,
    expected_tasks: Option<Vec<String>>,
    settings: WorkerSettings,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: JobHandler + 'static>(mut self, name: &str, handler: H) -> Result<Self> {
        self.registry.register(name, handler)?;
        Ok(self)
    }

    pub fn register_task<T: Task, H: Handler<T> + 'static>(mut self, handler: H) -> Result<Self> {
        self.registry.register_task::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Freeze the registry.
    ///
    /// Fails with `MissingTaskTypes` when an expected task has no handler.
    pub fn build(self) -> Result<WorkerApp> {
        if let Some(expected) = &self.expected_tasks {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(FerryError::MissingTaskTypes(missing));
            }
        }
        Ok(WorkerApp {
            registry: Arc::new(self.registry),
            settings: self.settings,
        })
    }
}

/// A frozen registry plus worker settings.
pub struct WorkerApp {
    pub registry: Arc<TaskRegistry>,
    pub settings: WorkerSettings,
}

impl WorkerApp {
    pub fn worker(&self, store: Arc<dyn JobStore>) -> Worker {
        Worker::new(store, Arc::clone(&self.registry), self.settings.clone())
    }

    pub fn spawn(&self, n: usize, store: Arc<dyn JobStore>) -> WorkerGroup {
        tracing::info!(workers = n, tasks = ?self.registry.registered_names(), "starting workers");
        WorkerGroup::spawn(n, store, Arc::clone(&self.registry), self.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::{HandlerError, handler_fn};

    fn echo() -> impl JobHandler + 'static {
        handler_fn(|_ctx, payload| async move { Ok::<_, HandlerError>(payload) })
    }

    #[test]
    fn build_succeeds_when_expectations_are_met() {
        let app = WorkerBuilder::new()
            .register("echo", echo())
            .unwrap()
            .expect_tasks(&["echo"])
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn build_reports_missing_tasks() {
        let app = WorkerBuilder::new()
            .register("echo", echo())
            .unwrap()
            .expect_tasks(&["echo", "background_task"])
            .build();
        assert!(matches!(
            app,
            Err(FerryError::MissingTaskTypes(missing)) if missing == vec!["background_task".to_string()]
        ));
    }

    #[test]
    fn build_without_expectations() {
        let app = WorkerBuilder::new().build().unwrap();
        assert!(app.registry.is_empty());
    }

    #[test]
    fn duplicate_registration_fails_the_builder() {
        let result = WorkerBuilder::new()
            .register("echo", echo())
            .unwrap()
            .register("echo", echo());
        assert!(matches!(result, Err(FerryError::DuplicateHandler(_))));
    }
}
