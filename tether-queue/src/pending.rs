use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::backend::{DriverCreator, QueueDriver};
use crate::{Arg, ChainJob, Job, QueueError, QueueResult, Task};

/// A dispatch being configured. Nothing happens until
/// [`PendingJob::dispatch`] or [`PendingJob::dispatch_sync`] is awaited.
pub struct PendingJob {
    creator: Arc<DriverCreator>,
    task: Task,
    connection: Option<String>,
    queue: Option<String>,
}

impl PendingJob {
    pub fn new(creator: Arc<DriverCreator>, job: Arc<dyn Job>, args: Vec<Arg>) -> Self {
        Self {
            creator,
            task: Task::new(job, args),
            connection: None,
            queue: None,
        }
    }

    /// A dispatch of several jobs run one after the other, each only after the
    /// previous one succeeded
    pub fn chain(creator: Arc<DriverCreator>, links: Vec<ChainJob>) -> QueueResult<Self> {
        let task = Task::from_chain(links)
            .ok_or_else(|| QueueError::InvalidArgument("chain has no jobs".to_string()))?;
        Ok(Self {
            creator,
            task,
            connection: None,
            queue: None,
        })
    }

    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Make the head job unavailable until `at`
    pub fn delay(mut self, at: DateTime<Utc>) -> Self {
        self.task.head.delay = Some(at);
        self
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    fn connection(&self) -> String {
        self.connection
            .clone()
            .unwrap_or_else(|| self.creator.config().default_connection())
    }

    /// Hand the task to the connection's driver
    #[instrument(skip(self), fields(uuid = %self.task.uuid, signature = self.task.signature()))]
    pub async fn dispatch(self) -> QueueResult<()> {
        let connection = self.connection();
        let queue = self
            .queue
            .clone()
            .unwrap_or_else(|| self.creator.config().default_queue(&connection));

        let driver = self.creator.create(&connection).await?;
        debug!(
            "Dispatching job {} ({}) to {}/{}",
            self.task.uuid,
            self.task.signature(),
            connection,
            queue
        );
        driver.push(&self.task, &queue).await
    }

    /// Run every job of the task right here, ignoring delays and the driver.
    ///
    /// Stops at the first failing job and returns its error.
    #[instrument(skip(self), fields(uuid = %self.task.uuid))]
    pub async fn dispatch_sync(self) -> QueueResult<()> {
        for link in self.task.links() {
            debug!("Running job {} synchronously", link.signature());
            link.job.handle(link.args.clone()).await?;
        }
        Ok(())
    }
}
