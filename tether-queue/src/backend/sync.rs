use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::QueueDriver;
use crate::{ChainJob, QueueError, QueueResult, ReservedJob, Task};

/// Runs pushed tasks inline on the caller's task.
///
/// Nothing is ever stored: `pop` reports an empty queue and `size` is zero.
#[derive(Debug, Clone)]
pub struct SyncDriver {
    connection: String,
}

impl SyncDriver {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
        }
    }

    async fn run_link(&self, link: &ChainJob) -> QueueResult<()> {
        if let Some(at) = link.delay {
            wait_until(at).await;
        }
        debug!(
            "Running job {} on sync connection {}",
            link.signature(),
            self.connection
        );
        link.job.handle(link.args.clone()).await?;
        Ok(())
    }
}

async fn wait_until(at: DateTime<Utc>) {
    if let Ok(wait) = (at - Utc::now()).to_std() {
        tokio::time::sleep(wait).await;
    }
}

#[async_trait]
impl QueueDriver for SyncDriver {
    fn connection(&self) -> &str {
        &self.connection
    }

    fn driver_name(&self) -> &'static str {
        "sync"
    }

    /// Execute the head and then every chained link in order, stopping at the
    /// first failure
    async fn push(&self, task: &Task, _queue: &str) -> QueueResult<()> {
        for link in task.links() {
            self.run_link(link).await?;
        }
        Ok(())
    }

    async fn pop(&self, queue: &str) -> QueueResult<ReservedJob> {
        Err(QueueError::DriverNoJobFound(queue.to_string()))
    }

    async fn delete(&self, _queue: &str, _job: &ReservedJob) -> QueueResult<()> {
        Ok(())
    }

    async fn release(&self, _queue: &str, _job: &ReservedJob, _delay: Duration) -> QueueResult<()> {
        Ok(())
    }

    async fn size(&self, _queue: &str) -> QueueResult<u64> {
        Ok(0)
    }

    async fn clear(&self, _queue: &str) -> QueueResult<u64> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arg, Job, JobError};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Job for Recorder {
        fn signature(&self) -> &str {
            self.name
        }

        async fn handle(&self, args: Vec<Arg>) -> Result<(), JobError> {
            let arg = args.first().and_then(Arg::as_str).unwrap_or_default();
            self.seen.lock().push(format!("{}:{}", self.name, arg));
            if self.fail {
                return Err(JobError::failed(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    fn recorder(name: &'static str, seen: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn Job> {
        Arc::new(Recorder {
            name,
            seen: seen.clone(),
            fail,
        })
    }

    #[tokio::test]
    async fn test_push_runs_chain_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = Task::from_chain(vec![
            ChainJob::new(recorder("a", &seen, false), vec![Arg::from("1")]),
            ChainJob::new(recorder("b", &seen, false), vec![Arg::from("2")]),
        ])
        .unwrap();

        SyncDriver::new("sync").push(&task, "default").await.unwrap();
        assert_eq!(*seen.lock(), vec!["a:1".to_string(), "b:2".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_stops_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = Task::from_chain(vec![
            ChainJob::new(recorder("a", &seen, true), vec![]),
            ChainJob::new(recorder("b", &seen, false), vec![]),
        ])
        .unwrap();

        let err = SyncDriver::new("sync").push(&task, "default").await.unwrap_err();
        assert!(matches!(err, QueueError::JobFailed(JobError::Failed(ref m)) if m == "a failed"));
        assert_eq!(*seen.lock(), vec!["a:".to_string()]);
    }

    #[tokio::test]
    async fn test_delayed_link_waits() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let at = Utc::now() + chrono::Duration::milliseconds(200);
        let task = Task::new(recorder("a", &seen, false), vec![]).with_delay(Some(at));

        SyncDriver::new("sync").push(&task, "default").await.unwrap();
        assert!(Utc::now() >= at);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_is_stored() {
        let driver = SyncDriver::new("sync");
        assert!(driver.pop("default").await.unwrap_err().is_no_job_found());
        assert_eq!(driver.size("default").await.unwrap(), 0);
        assert_eq!(driver.clear("default").await.unwrap(), 0);
    }
}
