//! Jobs stored in Redis lists and sorted sets.
//!
//! Each queue uses the four keys of [`QueueKeys`]. Every payload on the ready
//! list is matched by one token on the notify list, so an idle worker can
//! wait on the notify list with `BRPOP` instead of polling. The Lua scripts
//! in `lua/` keep that pairing intact.

mod keys;
mod scripts;

pub use keys::QueueKeys;

use std::sync::Arc;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use self::scripts::LuaScripts;
use super::{unix_now, unix_secs_ceil, QueueDriver};
use crate::codec::JsonCodec;
use crate::{JobRegistry, QueueError, QueueResult, ReservationToken, ReservedJob, Task};

/// Member stored on the Redis structures. The task envelope is kept as an
/// opaque string so Lua never re-encodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RedisPayload {
    uuid: String,
    attempts: u32,
    task: String,
}

/// Redis-backed queue driver
#[derive(Clone)]
pub struct RedisDriver {
    connection: String,
    client: Client,
    manager: ConnectionManager,
    retry_after: Duration,
    block_for: Option<Duration>,
    registry: JobRegistry,
    codec: JsonCodec,
    scripts: Arc<LuaScripts>,
}

impl RedisDriver {
    pub fn new(
        connection: impl Into<String>,
        client: Client,
        manager: ConnectionManager,
        retry_after: Duration,
        block_for: Option<Duration>,
        registry: JobRegistry,
    ) -> Self {
        Self {
            connection: connection.into(),
            client,
            manager,
            retry_after,
            block_for,
            registry,
            codec: JsonCodec,
            scripts: Arc::new(LuaScripts::new()),
        }
    }

    fn encode(&self, task: &Task) -> QueueResult<String> {
        let payload = RedisPayload {
            uuid: task.uuid.to_string(),
            attempts: 0,
            task: self.codec.encode(task)?,
        };
        Ok(serde_json::to_string(&payload)?)
    }

    /// Move delayed jobs that became due and reservations that expired back
    /// onto the ready list, returning how many were moved
    pub async fn migrate_expired_jobs(&self, queue: &str) -> QueueResult<u64> {
        let keys = QueueKeys::new(queue);
        let now = unix_now();
        let delayed = self.migrate(&keys.delayed, &keys, now).await?;
        let reserved = self.migrate(&keys.reserved, &keys, now).await?;
        Ok(delayed + reserved)
    }

    async fn migrate(&self, from: &str, keys: &QueueKeys, now: i64) -> QueueResult<u64> {
        let mut conn = self.manager.clone();
        let moved: u64 = self
            .scripts
            .migrate
            .key(from)
            .key(&keys.ready)
            .key(&keys.notify)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        if moved > 0 {
            debug!("Migrated {} jobs from {} to {}", moved, from, keys.ready);
        }
        Ok(moved)
    }

    /// Run the pop script; `token_taken` is set after a successful `BRPOP`
    async fn retrieve_next(&self, keys: &QueueKeys, token_taken: bool) -> QueueResult<Option<String>> {
        let expires_at = unix_now().saturating_add(secs(self.retry_after));
        let mut conn = self.manager.clone();
        let (job, reserved): (Option<String>, Option<String>) = self
            .scripts
            .pop
            .key(&keys.ready)
            .key(&keys.reserved)
            .key(&keys.notify)
            .arg(expires_at)
            .arg(if token_taken { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;

        Ok(job.and(reserved))
    }

    /// Earliest score among delayed jobs and reservations
    async fn next_due(&self, keys: &QueueKeys) -> QueueResult<Option<i64>> {
        let mut conn = self.manager.clone();
        let mut due: Option<i64> = None;
        for key in [&keys.delayed, &keys.reserved] {
            let first: Vec<(String, f64)> = conn.zrange_withscores(key, 0, 0).await?;
            if let Some((_, score)) = first.first() {
                let score = score.ceil() as i64;
                due = Some(due.map_or(score, |d| d.min(score)));
            }
        }
        Ok(due)
    }

    /// Block on the notify list. Returns whether a token was taken.
    ///
    /// A dedicated connection is used so the shared connection manager is
    /// never stuck behind a blocking command.
    async fn wait_for_notification(&self, keys: &QueueKeys, block_for: Duration) -> QueueResult<bool> {
        let timeout = blocking_timeout(block_for, self.next_due(keys).await?, unix_now());
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let token: Option<(String, String)> = ::redis::cmd("BRPOP")
            .arg(&keys.notify)
            .arg(timeout)
            .query_async(&mut conn)
            .await?;
        Ok(token.is_some())
    }

    fn reserve(&self, queue: &str, reserved: String) -> QueueResult<ReservedJob> {
        let payload: RedisPayload = serde_json::from_str(&reserved)?;
        let task = self.codec.decode(&payload.task, &self.registry).map_err(|e| {
            warn!("Reserved job {} on {} could not be decoded: {}", payload.uuid, queue, e);
            e
        })?;
        Ok(ReservedJob::new(
            task,
            payload.attempts,
            payload.task,
            ReservationToken::Reserved(reserved),
        ))
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// `BRPOP` timeout in whole seconds, `0` meaning forever. Never waits past the
/// next delayed job or reservation expiry, which only a later pop would migrate.
fn blocking_timeout(block_for: Duration, next_due: Option<i64>, now: i64) -> u64 {
    let block = block_for.as_secs();
    match next_due {
        Some(due) => {
            let until = u64::try_from(due.saturating_sub(now)).unwrap_or(0).max(1);
            if block == 0 {
                until
            } else {
                block.min(until)
            }
        }
        None => block,
    }
}

fn reserved_member(job: &ReservedJob) -> QueueResult<&str> {
    match &job.token {
        ReservationToken::Reserved(member) => Ok(member),
        other => Err(QueueError::InvalidArgument(format!(
            "not a redis reservation: {other:?}"
        ))),
    }
}

#[async_trait]
impl QueueDriver for RedisDriver {
    fn connection(&self) -> &str {
        &self.connection
    }

    fn driver_name(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, task: &Task, queue: &str) -> QueueResult<()> {
        let keys = QueueKeys::new(queue);
        let payload = self.encode(task)?;
        let mut conn = self.manager.clone();

        match task.delay().map(unix_secs_ceil) {
            Some(at) if at > unix_now() => {
                let _: i64 = conn.zadd(&keys.delayed, payload, at).await?;
                debug!("Scheduled job {} on {} for {}", task.uuid, keys.ready, at);
            }
            _ => {
                let _: i64 = self
                    .scripts
                    .push
                    .key(&keys.ready)
                    .key(&keys.notify)
                    .arg(payload)
                    .invoke_async(&mut conn)
                    .await?;
                debug!("Pushed job {} ({}) onto {}", task.uuid, task.signature(), keys.ready);
            }
        }
        Ok(())
    }

    async fn pop(&self, queue: &str) -> QueueResult<ReservedJob> {
        let keys = QueueKeys::new(queue);
        self.migrate_expired_jobs(queue).await?;

        if let Some(reserved) = self.retrieve_next(&keys, false).await? {
            return self.reserve(queue, reserved);
        }

        if let Some(block_for) = self.block_for {
            if self.wait_for_notification(&keys, block_for).await? {
                self.migrate_expired_jobs(queue).await?;
                if let Some(reserved) = self.retrieve_next(&keys, true).await? {
                    return self.reserve(queue, reserved);
                }
            }
        }

        Err(QueueError::DriverNoJobFound(queue.to_string()))
    }

    async fn delete(&self, queue: &str, job: &ReservedJob) -> QueueResult<()> {
        let keys = QueueKeys::new(queue);
        let mut conn = self.manager.clone();
        let _: i64 = conn.zrem(&keys.reserved, reserved_member(job)?).await?;
        Ok(())
    }

    async fn release(&self, queue: &str, job: &ReservedJob, delay: Duration) -> QueueResult<()> {
        let keys = QueueKeys::new(queue);
        let mut conn = self.manager.clone();
        let _: i64 = self
            .scripts
            .release
            .key(&keys.delayed)
            .key(&keys.reserved)
            .arg(reserved_member(job)?)
            .arg(unix_now().saturating_add(secs(delay)))
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn size(&self, queue: &str) -> QueueResult<u64> {
        let keys = QueueKeys::new(queue);
        let mut conn = self.manager.clone();
        let size: u64 = self
            .scripts
            .size
            .key(&keys.ready)
            .key(&keys.delayed)
            .key(&keys.reserved)
            .invoke_async(&mut conn)
            .await?;
        Ok(size)
    }

    async fn clear(&self, queue: &str) -> QueueResult<u64> {
        let keys = QueueKeys::new(queue);
        let mut conn = self.manager.clone();
        let cleared: u64 = self
            .scripts
            .clear
            .key(&keys.ready)
            .key(&keys.delayed)
            .key(&keys.reserved)
            .key(&keys.notify)
            .invoke_async(&mut conn)
            .await?;
        Ok(cleared)
    }
}
