//! ferry-core
//!
//! A small job queue: producers enqueue named jobs, workers claim them under a
//! time-bounded lease, run the registered handler and report the outcome.
//!
//! # Modules
//! - **domain**: job record, ids, state machine, failure kinds, retry policy
//! - **ports**: `JobStore`, `Clock`, `IdGenerator`
//! - **impls**: `InMemoryStore`, `RedisStore`
//! - **typed**: `JobHandler`, typed `Task`/`Handler<T>`, `TaskRegistry`
//! - **app**: `Producer`, `Worker`/`WorkerGroup`, `WorkerBuilder`, `ReaperLoop`
//! - **config**, **error**, **observability**
//!
//! Delivery is at-least-once. See `typed::JobHandler`.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use crate::app::{
    Producer, QueueCounts, ReaperLoop, ShutdownMode, Worker, WorkerApp, WorkerBuilder,
    WorkerGroup, WorkerSettings,
};
pub use crate::config::FerryConfig;
pub use crate::domain::{ErrorKind, JobFailure, JobId, JobRecord, JobState, TaskName};
pub use crate::error::{FerryError, Result};
pub use crate::impls::{InMemoryStore, RedisStore};
pub use crate::ports::JobStore;
pub use crate::typed::{
    Handler, HandlerError, JobContext, JobHandler, Task, TaskRegistry, handler_fn,
};
