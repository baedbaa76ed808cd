//! IdGenerator port - ID generation as a dependency.
//!
//! # Implementations
//! - **UlidGenerator**: ULID from a `Clock` timestamp plus 80 random bits

use crate::domain::{JobId, LeaseToken};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator hands out identifiers that are unique without coordination.
///
/// `Send + Sync` because producers share one generator across requests.
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_lease_token(&self) -> LeaseToken;
}

/// ULID generator driven by a `Clock`.
///
/// With a fixed clock the timestamp part is deterministic; the random part
/// still keeps ids distinct.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next())
    }

    fn generate_lease_token(&self) -> LeaseToken {
        LeaseToken::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ManualClock, SystemClock};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);
        let ids: HashSet<JobId> = (0..1_000).map(|_| id_gen.generate_job_id()).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn job_ids_and_lease_tokens_do_not_collide() {
        let id_gen = UlidGenerator::new(SystemClock);
        let job = id_gen.generate_job_id();
        let token = id_gen.generate_lease_token();
        assert_ne!(job.as_ulid(), token.as_ulid());
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(ManualClock::new(fixed_time));

        let id1 = id_gen.generate_job_id();
        let id2 = id_gen.generate_job_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }
}
