//! Handler traits.
//!
//! Two layers:
//! - `JobHandler`: object-safe, works on raw JSON. This is what the registry
//!   stores and the worker calls.
//! - `Handler<T>`: typed surface for a `Task`. `TypedHandler` erases it into a
//!   `JobHandler` by decoding the payload first.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::codec;
use super::task::Task;
use crate::domain::{ErrorKind, JobFailure, JobId, TaskName};

/// What a handler reports when an attempt fails.
///
/// `?` on any `std::error::Error` converts into `Transient`, so a handler only
/// has to say so explicitly when retrying would not help.
pub enum HandlerError {
    /// Retry while attempts remain.
    Transient(String),
    /// Fail the job now.
    Permanent(String),
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        HandlerError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        HandlerError::Permanent(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Transient(_) => ErrorKind::Transient,
            HandlerError::Permanent(_) => ErrorKind::Permanent,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Transient(m) | HandlerError::Permanent(m) => m,
        }
    }

    pub fn into_failure(self) -> JobFailure {
        let kind = self.kind();
        match self {
            HandlerError::Transient(m) | HandlerError::Permanent(m) => JobFailure::new(kind, m),
        }
    }
}

// Not a `std::error::Error` itself, or this would overlap with `From<T> for T`.
impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        HandlerError::Transient(err.to_string())
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Transient(m) => f.debug_tuple("Transient").field(m).finish(),
            HandlerError::Permanent(m) => f.debug_tuple("Permanent").field(m).finish(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Transient(m) => write!(f, "transient: {m}"),
            HandlerError::Permanent(m) => write!(f, "permanent: {m}"),
        }
    }
}

/// What a handler knows about the attempt it is running.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub task_name: TaskName,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl JobContext {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Executes jobs of one task name.
///
/// Delivery is at-least-once: a worker that dies after the handler returns but
/// before the outcome is stored leaves the job to be run again once its lease
/// lapses. Handlers must be idempotent.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext, payload: Value) -> Result<Value, HandlerError>;
}

/// `JobHandler` backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a `JobHandler`.
///
/// ```ignore
/// registry.register("echo", handler_fn(|_ctx, payload| async move { Ok::<_, HandlerError>(payload) }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, ctx: JobContext, payload: Value) -> Result<Value, HandlerError> {
        (self.f)(ctx, payload).await
    }
}

/// Typed handler for task `T`.
///
/// ```ignore
/// struct SendEmailHandler;
///
/// #[async_trait]
/// impl Handler<SendEmail> for SendEmailHandler {
///     type Output = ();
///     async fn handle(&self, ctx: JobContext, task: SendEmail) -> Result<(), HandlerError> {
///         mailer.send(&task.to, &task.body).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    type Output: Serialize + Send;

    async fn handle(&self, ctx: JobContext, task: T) -> Result<Self::Output, HandlerError>;
}

/// Adapter from `Handler<T>` to `JobHandler`.
///
/// A payload that does not decode as `T` fails permanently: a retry would see
/// the same bytes.
pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> JobHandler for TypedHandler<T, H> {
    async fn handle(&self, ctx: JobContext, payload: Value) -> Result<Value, HandlerError> {
        let task: T = codec::decode(payload)?;
        let output = self.handler.handle(ctx, task).await?;
        codec::encode(&output)
    }
}
