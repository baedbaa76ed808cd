//! TaskRegistry - task name -> handler.
//!
//! Built once at startup, then shared behind an `Arc` and only read. Workers
//! resolve handlers without any locking.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{Handler, JobHandler, TypedHandler};
use super::task::Task;
use crate::domain::TaskName;
use crate::error::{FerryError, Result};

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    ///
    /// Fails on a malformed name or when `name` already has a handler.
    pub fn register<H: JobHandler + 'static>(&mut self, name: &str, handler: H) -> Result<()> {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_arc(&mut self, name: &str, handler: Arc<dyn JobHandler>) -> Result<()> {
        let name = TaskName::new(name)?;
        if self.handlers.contains_key(name.as_str()) {
            return Err(FerryError::DuplicateHandler(name));
        }
        self.handlers.insert(name.as_str().to_string(), handler);
        Ok(())
    }

    /// Register a typed handler under `T::NAME`.
    pub fn register_task<T: Task, H: Handler<T> + 'static>(&mut self, handler: H) -> Result<()> {
        self.register(T::NAME, TypedHandler::<T, H>::new(handler))
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.registered_names())
            .finish()
    }
}
