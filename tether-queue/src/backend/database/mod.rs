//! Jobs stored as rows of a SQL table.
//!
//! A row is available when it is unreserved and its `available_at` has
//! passed, or when its reservation is older than `retry_after`.
//!
//! On PostgreSQL the candidate row is selected with `FOR UPDATE SKIP LOCKED`
//! inside a transaction and then claimed by an `UPDATE` that re-checks the
//! reservation. SQLite has no row locks and refuses to upgrade a read
//! transaction while another connection writes, so there the row is
//! selected and claimed by a single `UPDATE ... RETURNING` statement.

pub(crate) mod schema;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};
use tracing::{debug, warn};

use super::{unix_now, unix_secs_ceil, QueueDriver};
use crate::codec::JsonCodec;
use crate::{JobRegistry, QueueError, QueueResult, ReservationToken, ReservedJob, Task};

/// SQL flavour of a database connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Infer the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> QueueResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(QueueError::InvalidDatabaseConnection(format!(
                "unsupported database scheme: {other}"
            ))),
        }
    }

    fn lock_clause(self) -> &'static str {
        match self {
            Self::Postgres => " FOR UPDATE SKIP LOCKED",
            Self::Sqlite => "",
        }
    }
}

/// A named database connection the queue can store jobs in
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    pub pool: AnyPool,
    pub dialect: Dialect,
}

impl DatabaseHandle {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    /// Connect with default pool options
    pub async fn connect(url: &str) -> QueueResult<Self> {
        Self::connect_with(AnyPoolOptions::new(), url).await
    }

    pub async fn connect_with(options: AnyPoolOptions, url: &str) -> QueueResult<Self> {
        install_default_drivers();
        let dialect = Dialect::from_url(url)?;
        let pool = options.connect(url).await?;
        Ok(Self { pool, dialect })
    }
}

struct Statements {
    insert: String,
    select_next: String,
    claim: String,
    reserve_next: String,
    delete: String,
    size: String,
    clear: String,
}

impl Statements {
    fn new(dialect: Dialect, table: &str) -> Self {
        Self {
            insert: format!(
                "INSERT INTO {table} (queue, payload, attempts, reserved_at, available_at, created_at) \
                 VALUES ($1, $2, $3, NULL, $4, $5)"
            ),
            select_next: format!(
                "SELECT id, payload, attempts FROM {table} \
                 WHERE queue = $1 \
                 AND ((reserved_at IS NULL AND available_at <= $2) OR reserved_at < $3) \
                 ORDER BY id ASC LIMIT 1{lock}",
                lock = dialect.lock_clause(),
            ),
            claim: format!(
                "UPDATE {table} SET reserved_at = $1, attempts = attempts + 1 \
                 WHERE id = $2 AND (reserved_at IS NULL OR reserved_at < $3)"
            ),
            reserve_next: format!(
                "UPDATE {table} SET reserved_at = $1, attempts = attempts + 1 \
                 WHERE id = (SELECT id FROM {table} \
                 WHERE queue = $2 \
                 AND ((reserved_at IS NULL AND available_at <= $3) OR reserved_at < $4) \
                 ORDER BY id ASC LIMIT 1) \
                 RETURNING id, payload, attempts"
            ),
            delete: format!("DELETE FROM {table} WHERE id = $1"),
            size: format!("SELECT COUNT(*) FROM {table} WHERE queue = $1"),
            clear: format!("DELETE FROM {table} WHERE queue = $1"),
        }
    }
}

/// Database-backed queue driver
#[derive(Clone)]
pub struct DatabaseDriver {
    connection: String,
    handle: DatabaseHandle,
    table: String,
    retry_after: Duration,
    registry: JobRegistry,
    codec: JsonCodec,
    statements: Arc<Statements>,
}

impl DatabaseDriver {
    pub fn new(
        connection: impl Into<String>,
        handle: DatabaseHandle,
        table: impl Into<String>,
        retry_after: Duration,
        registry: JobRegistry,
    ) -> QueueResult<Self> {
        let table = table.into();
        schema::validate_identifier(&table)?;
        let statements = Statements::new(handle.dialect, &table);
        Ok(Self {
            connection: connection.into(),
            handle,
            table,
            retry_after,
            registry,
            codec: JsonCodec,
            statements: Arc::new(statements),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the jobs table if it does not exist yet
    pub async fn migrate(&self) -> QueueResult<()> {
        for statement in schema::jobs_table(self.handle.dialect, &self.table) {
            sqlx::query(&statement).execute(&self.handle.pool).await?;
        }
        Ok(())
    }

    fn reservation_cutoff(&self, now: i64) -> i64 {
        let retry_after = i64::try_from(self.retry_after.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(retry_after)
    }

    /// Select under `FOR UPDATE SKIP LOCKED`, then claim. Returns the row id,
    /// payload and attempts including this reservation.
    async fn reserve_locked(&self, queue: &str) -> QueueResult<Option<(i64, String, i64)>> {
        let now = unix_now();
        let cutoff = self.reservation_cutoff(now);

        let mut tx = self.handle.pool.begin().await?;
        let row = sqlx::query(&self.statements.select_next)
            .bind(queue)
            .bind(now)
            .bind(cutoff)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let payload: String = row.try_get("payload")?;
        let attempts: i64 = row.try_get("attempts")?;

        let claimed = sqlx::query(&self.statements.claim)
            .bind(now)
            .bind(id)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if claimed == 0 {
            debug!("Job row {} was claimed by another worker", id);
            return Ok(None);
        }
        Ok(Some((id, payload, attempts + 1)))
    }

    /// Select and claim in one statement, which SQLite runs as a single
    /// write transaction
    async fn reserve_returning(&self, queue: &str) -> QueueResult<Option<(i64, String, i64)>> {
        let now = unix_now();
        let row = sqlx::query(&self.statements.reserve_next)
            .bind(now)
            .bind(queue)
            .bind(now)
            .bind(self.reservation_cutoff(now))
            .fetch_optional(&self.handle.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: i64 = row.try_get("id")?;
        let payload: String = row.try_get("payload")?;
        let attempts: i64 = row.try_get("attempts")?;
        Ok(Some((id, payload, attempts)))
    }

    async fn insert(&self, queue: &str, payload: &str, attempts: i64, available_at: i64) -> QueueResult<()> {
        sqlx::query(&self.statements.insert)
            .bind(queue)
            .bind(payload)
            .bind(attempts)
            .bind(available_at)
            .bind(unix_now())
            .execute(&self.handle.pool)
            .await?;
        Ok(())
    }
}

fn row_id(job: &ReservedJob) -> QueueResult<i64> {
    match job.token {
        ReservationToken::Row(id) => Ok(id),
        ref other => Err(QueueError::InvalidArgument(format!(
            "not a database reservation: {other:?}"
        ))),
    }
}

fn available_at(delay: Option<DateTime<Utc>>, now: i64) -> i64 {
    match delay {
        Some(at) => unix_secs_ceil(at).max(now),
        None => now,
    }
}

#[async_trait]
impl QueueDriver for DatabaseDriver {
    fn connection(&self) -> &str {
        &self.connection
    }

    fn driver_name(&self) -> &'static str {
        "database"
    }

    async fn push(&self, task: &Task, queue: &str) -> QueueResult<()> {
        let payload = self.codec.encode(task)?;
        let available_at = available_at(task.delay(), unix_now());
        self.insert(queue, &payload, 0, available_at).await?;
        debug!("Pushed job {} ({}) onto {}", task.uuid, task.signature(), queue);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> QueueResult<ReservedJob> {
        let reserved = match self.handle.dialect {
            Dialect::Postgres => self.reserve_locked(queue).await?,
            Dialect::Sqlite => self.reserve_returning(queue).await?,
        };
        let Some((id, payload, attempts)) = reserved else {
            return Err(QueueError::DriverNoJobFound(queue.to_string()));
        };

        // The reservation stands even when the payload is unreadable; it
        // expires after retry_after like any other.
        let task = self.codec.decode(&payload, &self.registry).map_err(|e| {
            warn!("Reserved job row {} on {} could not be decoded: {}", id, queue, e);
            e
        })?;

        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        Ok(ReservedJob::new(task, attempts, payload, ReservationToken::Row(id)))
    }

    async fn delete(&self, _queue: &str, job: &ReservedJob) -> QueueResult<()> {
        sqlx::query(&self.statements.delete)
            .bind(row_id(job)?)
            .execute(&self.handle.pool)
            .await?;
        Ok(())
    }

    /// Replace the reserved row by a fresh one carrying the same payload and
    /// attempt count, so the job goes to the back of the queue
    async fn release(&self, queue: &str, job: &ReservedJob, delay: Duration) -> QueueResult<()> {
        let id = row_id(job)?;
        let now = unix_now();
        let delay = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);

        let mut tx = self.handle.pool.begin().await?;
        sqlx::query(&self.statements.delete)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&self.statements.insert)
            .bind(queue)
            .bind(job.payload.as_str())
            .bind(i64::from(job.attempts))
            .bind(now.saturating_add(delay))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn size(&self, queue: &str) -> QueueResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(&self.statements.size)
            .bind(queue)
            .fetch_one(&self.handle.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn clear(&self, queue: &str) -> QueueResult<u64> {
        let result = sqlx::query(&self.statements.clear)
            .bind(queue)
            .execute(&self.handle.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
