use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job whose handler returned an error, as persisted by a failed-job provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Row id once stored; `None` while in flight from the worker
    pub id: Option<i64>,
    pub uuid: String,
    pub connection: String,
    pub queue: String,
    /// The task envelope exactly as it was popped
    pub payload: String,
    pub exception: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedJob {
    pub fn new(
        uuid: impl Into<String>,
        connection: impl Into<String>,
        queue: impl Into<String>,
        payload: impl Into<String>,
        exception: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            uuid: uuid.into(),
            connection: connection.into(),
            queue: queue.into(),
            payload: payload.into(),
            exception: exception.into(),
            failed_at: Utc::now(),
        }
    }
}
