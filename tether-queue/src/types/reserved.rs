use super::Task;

/// Driver-specific handle proving a job was reserved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationToken {
    /// Primary key of the reserved row in the jobs table
    Row(i64),
    /// Exact member stored in the Redis `:reserved` sorted set
    Reserved(String),
    /// Whatever a custom driver needs to find the job again
    Custom(String),
}

/// A job handed out by `pop`, claimed until deleted, released or expired
#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub task: Task,
    /// Number of times this job has been reserved, this reservation included
    pub attempts: u32,
    /// The serialized task as stored by the driver
    pub payload: String,
    pub token: ReservationToken,
}

impl ReservedJob {
    pub fn new(task: Task, attempts: u32, payload: String, token: ReservationToken) -> Self {
        Self {
            task,
            attempts,
            payload,
            token,
        }
    }

    pub fn uuid(&self) -> &str {
        self.task.uuid.as_str()
    }

    pub fn signature(&self) -> &str {
        self.task.signature()
    }
}
