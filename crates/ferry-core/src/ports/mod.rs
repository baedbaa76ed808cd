//! Ports - the seams between the core and its environment.
//!
//! Each trait hides an external dependency (the queue store, time, id
//! generation) so the worker and producer can be tested against fakes.

pub mod clock;
pub mod id_generator;
pub mod job_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{CLAIM_POLL_INTERVAL, ClaimedJob, JobStore};
