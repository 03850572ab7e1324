use async_trait::async_trait;
use chrono::DateTime;
use sqlx::any::AnyRow;
use sqlx::Row;
use tracing::warn;

use crate::backend::database::schema;
use crate::backend::DatabaseHandle;
use crate::{FailedJob, QueueError, QueueResult};

/// Which failed jobs to return; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedJobFilter {
    pub connection: Option<String>,
    pub queue: Option<String>,
    pub uuids: Vec<String>,
}

impl FailedJobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn uuids<I, S>(mut self, uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uuids = uuids.into_iter().map(Into::into).collect();
        self
    }
}

/// Where failed jobs are kept
#[async_trait]
pub trait FailedJobProvider: Send + Sync {
    async fn record(&self, job: &FailedJob) -> QueueResult<()>;

    /// Matching failed jobs, oldest first
    async fn find(&self, filter: &FailedJobFilter) -> QueueResult<Vec<FailedJob>>;

    async fn all(&self) -> QueueResult<Vec<FailedJob>> {
        self.find(&FailedJobFilter::default()).await
    }

    /// Delete one record by id; `false` if it did not exist
    async fn delete(&self, id: i64) -> QueueResult<bool>;

    /// Delete every record of a dispatch, returning how many were removed
    async fn forget(&self, uuid: &str) -> QueueResult<u64>;

    /// Delete every record
    async fn flush(&self) -> QueueResult<u64>;
}

/// Failed jobs stored in a SQL table
#[derive(Debug, Clone)]
pub struct DatabaseFailedJobProvider {
    handle: DatabaseHandle,
    table: String,
}

impl DatabaseFailedJobProvider {
    pub fn new(handle: DatabaseHandle, table: impl Into<String>) -> QueueResult<Self> {
        let table = table.into();
        schema::validate_identifier(&table)?;
        Ok(Self { handle, table })
    }

    /// Create the failed jobs table if it does not exist yet
    pub async fn migrate(&self) -> QueueResult<()> {
        for statement in schema::failed_jobs_table(self.handle.dialect, &self.table) {
            sqlx::query(&statement).execute(&self.handle.pool).await?;
        }
        Ok(())
    }
}

fn failed_job_from_row(row: &AnyRow) -> QueueResult<FailedJob> {
    let failed_at: i64 = row.try_get("failed_at")?;
    let failed_at = DateTime::from_timestamp(failed_at, 0)
        .ok_or_else(|| QueueError::Internal(format!("invalid failed_at timestamp: {failed_at}")))?;

    Ok(FailedJob {
        id: Some(row.try_get("id")?),
        uuid: row.try_get("uuid")?,
        connection: row.try_get("connection")?,
        queue: row.try_get("queue")?,
        payload: row.try_get("payload")?,
        exception: row.try_get("exception")?,
        failed_at,
    })
}

/// `WHERE` clause and its bind values for a filter
fn filter_clause(filter: &FailedJobFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    if let Some(connection) = &filter.connection {
        binds.push(connection.clone());
        clauses.push(format!("connection = ${}", binds.len()));
    }
    if let Some(queue) = &filter.queue {
        binds.push(queue.clone());
        clauses.push(format!("queue = ${}", binds.len()));
    }
    if !filter.uuids.is_empty() {
        let placeholders: Vec<String> = filter
            .uuids
            .iter()
            .map(|uuid| {
                binds.push(uuid.clone());
                format!("${}", binds.len())
            })
            .collect();
        clauses.push(format!("uuid IN ({})", placeholders.join(", ")));
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), binds)
    }
}

#[async_trait]
impl FailedJobProvider for DatabaseFailedJobProvider {
    async fn record(&self, job: &FailedJob) -> QueueResult<()> {
        let sql = format!(
            "INSERT INTO {} (uuid, connection, queue, payload, exception, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            self.table
        );
        sqlx::query(&sql)
            .bind(job.uuid.as_str())
            .bind(job.connection.as_str())
            .bind(job.queue.as_str())
            .bind(job.payload.as_str())
            .bind(job.exception.as_str())
            .bind(job.failed_at.timestamp())
            .execute(&self.handle.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, filter: &FailedJobFilter) -> QueueResult<Vec<FailedJob>> {
        let (clause, binds) = filter_clause(filter);
        let sql = format!(
            "SELECT id, uuid, connection, queue, payload, exception, failed_at FROM {}{} ORDER BY id ASC",
            self.table, clause
        );

        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value);
        }

        let rows = query.fetch_all(&self.handle.pool).await?;
        rows.iter().map(failed_job_from_row).collect()
    }

    async fn delete(&self, id: i64) -> QueueResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.handle.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn forget(&self, uuid: &str) -> QueueResult<u64> {
        let sql = format!("DELETE FROM {} WHERE uuid = $1", self.table);
        let result = sqlx::query(&sql).bind(uuid).execute(&self.handle.pool).await?;
        Ok(result.rows_affected())
    }

    async fn flush(&self) -> QueueResult<u64> {
        let sql = format!("DELETE FROM {}", self.table);
        let result = sqlx::query(&sql).execute(&self.handle.pool).await?;
        Ok(result.rows_affected())
    }
}

/// Used when no failed jobs database is configured: failures are logged and
/// nothing is kept
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFailedJobProvider;

#[async_trait]
impl FailedJobProvider for NullFailedJobProvider {
    async fn record(&self, job: &FailedJob) -> QueueResult<()> {
        warn!(
            uuid = %job.uuid,
            connection = %job.connection,
            queue = %job.queue,
            "Job failed: {}",
            job.exception
        );
        Ok(())
    }

    async fn find(&self, _filter: &FailedJobFilter) -> QueueResult<Vec<FailedJob>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: i64) -> QueueResult<bool> {
        Ok(false)
    }

    async fn forget(&self, _uuid: &str) -> QueueResult<u64> {
        Ok(0)
    }

    async fn flush(&self) -> QueueResult<u64> {
        Ok(0)
    }
}
