//! App - the producer and worker sides built on top of the ports.
//!
//! - **Producer**: validates and enqueues jobs
//! - **Worker / WorkerGroup**: claim -> run -> report, with heartbeats
//! - **WorkerBuilder**: registry wiring with fail-fast validation
//! - **ReaperLoop**: background reclaim of lapsed leases
//! - **QueueCounts**: per-state job counts

pub mod builder;
pub mod producer;
pub mod reaper_loop;
pub mod status;
pub mod worker_loop;

pub use self::builder::{WorkerApp, WorkerBuilder};
pub use self::producer::Producer;
pub use self::reaper_loop::ReaperLoop;
pub use self::status::QueueCounts;
pub use self::worker_loop::{ShutdownMode, Worker, WorkerGroup, WorkerSettings};
