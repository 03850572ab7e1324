use std::time::Duration;

use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// No handler registered under this signature
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Queue driver not supported: {0}")]
    DriverNotSupported(String),

    /// `via` did not resolve to a registered driver instance or factory
    #[error("Custom queue driver is invalid: {0}")]
    DriverInvalid(String),

    #[error("Queue connection is not configured: {0}")]
    ConnectionNotConfigured(String),

    #[error("Invalid database connection for queue connection: {0}")]
    InvalidDatabaseConnection(String),

    #[error("Invalid redis connection for queue connection: {0}")]
    InvalidRedisConnection(String),

    #[error("Queue connection {0} uses the sync driver, there is nothing to run")]
    DriverSyncNotNeedToRun(String),

    #[error("No job found in queue: {0}")]
    DriverNoJobFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Job execution failed: {0}")]
    JobFailed(#[from] JobError),

    #[error("Failed job not found: {0}")]
    FailedJobNotFound(String),

    #[error("Worker shutdown")]
    WorkerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Whether this error only means the queue had nothing to hand out
    pub fn is_no_job_found(&self) -> bool {
        matches!(self, Self::DriverNoJobFound(_))
    }
}

/// Job execution outcome returned by handlers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// The job failed; a worker records it as a failed job
    #[error("{0}")]
    Failed(String),

    /// The job asks to be put back on its queue and retried after the delay
    #[error("Job released back onto the queue for {0:?}")]
    Release(Duration),
}

impl JobError {
    /// Create a failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Ask the worker to release the job with the given delay
    pub fn release(delay: Duration) -> Self {
        Self::Release(delay)
    }

    pub fn is_release(&self) -> bool {
        matches!(self, Self::Release(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}
