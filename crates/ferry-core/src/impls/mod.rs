//! Impls - `JobStore` implementations.
//!
//! - **InMemoryStore**: one process, tests and local runs
//! - **RedisStore**: shared queue for producers and workers in separate processes

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::{RedisKeys, RedisStore};
