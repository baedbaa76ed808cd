//! Typed - handlers and the registry that maps task names to them.
//!
//! - **Raw**: `JobHandler` works on JSON payloads and is object-safe
//! - **Typed**: `Task` + `Handler<T>`; `TypedHandler` decodes the payload and
//!   erases the type so both kinds live in one `TaskRegistry`

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{
    FnHandler, Handler, HandlerError, JobContext, JobHandler, TypedHandler, handler_fn,
};
pub use self::registry::TaskRegistry;
pub use self::task::Task;
