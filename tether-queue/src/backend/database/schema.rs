use super::Dialect;
use crate::{QueueError, QueueResult};

/// Table names are interpolated into SQL, so only plain identifiers are accepted
pub(crate) fn validate_identifier(name: &str) -> QueueResult<&str> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(name)
    } else {
        Err(QueueError::InvalidArgument(format!(
            "invalid table name: {name:?}"
        )))
    }
}

fn id_column(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
        Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
    }
}

/// DDL for the jobs table and the index serving the pop predicate
pub(crate) fn jobs_table(dialect: Dialect, table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {id},
                queue VARCHAR(255) NOT NULL,
                payload TEXT NOT NULL,
                attempts BIGINT NOT NULL DEFAULT 0,
                reserved_at BIGINT NULL,
                available_at BIGINT NOT NULL,
                created_at BIGINT NOT NULL
            )",
            id = id_column(dialect),
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {table}_queue_reserved_at_index \
             ON {table} (queue, reserved_at, available_at)"
        ),
    ]
}

/// DDL for the failed jobs table
pub(crate) fn failed_jobs_table(dialect: Dialect, table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {id},
                uuid VARCHAR(255) NOT NULL,
                connection TEXT NOT NULL,
                queue TEXT NOT NULL,
                payload TEXT NOT NULL,
                exception TEXT NOT NULL,
                failed_at BIGINT NOT NULL
            )",
            id = id_column(dialect),
        ),
        format!("CREATE INDEX IF NOT EXISTS {table}_uuid_index ON {table} (uuid)"),
        format!(
            "CREATE INDEX IF NOT EXISTS {table}_queue_failed_at_index ON {table} (queue, failed_at)"
        ),
    ]
}
