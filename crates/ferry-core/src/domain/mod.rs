//! Domain model (ids, task names, job record, state machine, retry policy).

pub mod decision;
pub mod errors;
pub mod ids;
pub mod job;
pub mod state;
pub mod task_name;

pub use decision::{Backoff, Decision, RetryPolicy};
pub use errors::{ErrorKind, JobFailure};
pub use ids::{JobId, LeaseToken, ParseIdError, WorkerId};
pub use job::{JobRecord, Lease, add_duration};
pub use state::JobState;
pub use task_name::TaskName;
