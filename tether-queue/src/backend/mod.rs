pub mod creator;
pub mod database;
pub mod redis;
pub mod sync;

pub use creator::{CustomDriver, DriverCreator};
pub use database::{DatabaseDriver, DatabaseHandle, Dialect};
pub use self::redis::RedisDriver;
pub use sync::SyncDriver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{QueueResult, ReservedJob, Task};

/// Storage primitives every queue driver provides
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Name of the queue connection this driver serves
    fn connection(&self) -> &str;

    /// Driver kind, e.g. `sync`, `database`, `redis`
    fn driver_name(&self) -> &'static str;

    /// Store a task on `queue`. A head delay in the future makes it
    /// unavailable until that time.
    async fn push(&self, task: &Task, queue: &str) -> QueueResult<()>;

    /// Store a task that becomes available at `at`
    async fn later(&self, at: DateTime<Utc>, task: &Task, queue: &str) -> QueueResult<()> {
        let delayed = task.clone().with_delay(Some(at));
        self.push(&delayed, queue).await
    }

    /// Reserve the next available job. Fails with `DriverNoJobFound` when
    /// nothing is available.
    async fn pop(&self, queue: &str) -> QueueResult<ReservedJob>;

    /// Remove a reserved job for good
    async fn delete(&self, queue: &str, job: &ReservedJob) -> QueueResult<()>;

    /// Put a reserved job back, available again after `delay`
    async fn release(&self, queue: &str, job: &ReservedJob, delay: Duration) -> QueueResult<()>;

    /// Number of jobs held for `queue`, reserved and delayed ones included
    async fn size(&self, queue: &str) -> QueueResult<u64>;

    /// Drop every job held for `queue`, returning how many there were
    async fn clear(&self, queue: &str) -> QueueResult<u64>;
}

/// The driver behind a queue connection
#[derive(Clone)]
pub enum Driver {
    Sync(SyncDriver),
    Database(DatabaseDriver),
    Redis(RedisDriver),
    Custom(Arc<dyn QueueDriver>),
}

impl Driver {
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }

    fn inner(&self) -> &dyn QueueDriver {
        match self {
            Self::Sync(driver) => driver,
            Self::Database(driver) => driver,
            Self::Redis(driver) => driver,
            Self::Custom(driver) => driver.as_ref(),
        }
    }
}

#[async_trait]
impl QueueDriver for Driver {
    fn connection(&self) -> &str {
        self.inner().connection()
    }

    fn driver_name(&self) -> &'static str {
        self.inner().driver_name()
    }

    async fn push(&self, task: &Task, queue: &str) -> QueueResult<()> {
        self.inner().push(task, queue).await
    }

    async fn later(&self, at: DateTime<Utc>, task: &Task, queue: &str) -> QueueResult<()> {
        self.inner().later(at, task, queue).await
    }

    async fn pop(&self, queue: &str) -> QueueResult<ReservedJob> {
        self.inner().pop(queue).await
    }

    async fn delete(&self, queue: &str, job: &ReservedJob) -> QueueResult<()> {
        self.inner().delete(queue, job).await
    }

    async fn release(&self, queue: &str, job: &ReservedJob, delay: Duration) -> QueueResult<()> {
        self.inner().release(queue, job, delay).await
    }

    async fn size(&self, queue: &str) -> QueueResult<u64> {
        self.inner().size(queue).await
    }

    async fn clear(&self, queue: &str) -> QueueResult<u64> {
        self.inner().clear(queue).await
    }
}

/// Wall-clock seconds used for availability and reservation timestamps
pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Unix seconds of `at`, rounded up so nothing scheduled for it runs early
pub(crate) fn unix_secs_ceil(at: DateTime<Utc>) -> i64 {
    at.timestamp() + i64::from(at.timestamp_subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unix_secs_ceil() {
        let exact = Utc.timestamp_opt(2_000, 0).unwrap();
        assert_eq!(unix_secs_ceil(exact), 2_000);

        // A fraction of a second past a boundary belongs to the next second
        let fraction = Utc.timestamp_opt(2_000, 300_000_000).unwrap();
        assert_eq!(unix_secs_ceil(fraction), 2_001);
    }
}
