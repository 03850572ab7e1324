use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::backend::{CustomDriver, DatabaseHandle, Driver, DriverCreator, QueueDriver};
use crate::execution::{Worker, WorkerOptions};
use crate::failer::{DatabaseFailedJobProvider, FailedJobProvider, Failer, NullFailedJobProvider};
use crate::{Arg, ChainJob, Job, JobRegistry, PendingJob, QueueConfig, QueueError, QueueResult};

/// The queue as the application sees it: register jobs, dispatch them, run
/// workers and manage failed jobs.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tether_queue::prelude::*;
///
/// struct SendWelcomeMail;
///
/// #[async_trait::async_trait]
/// impl Job for SendWelcomeMail {
///     fn signature(&self) -> &str {
///         "send_welcome_mail"
///     }
///
///     async fn handle(&self, args: Vec<Arg>) -> Result<(), JobError> {
///         let address = args.first().and_then(Arg::as_str).unwrap_or_default();
///         tracing::info!("welcome mail to {address}");
///         Ok(())
///     }
/// }
///
/// # async fn run() -> QueueResult<()> {
/// let config = QueueConfig::new()
///     .with("queue.default", "database")
///     .with("queue.connections.database.driver", "database");
/// let queue = QueueAdapter::new(config)
///     .with_database("default", DatabaseHandle::connect("sqlite://jobs.db").await?);
/// queue.migrate().await?;
///
/// let job: Arc<dyn Job> = Arc::new(SendWelcomeMail);
/// queue.register(vec![job.clone()]);
/// queue.job(job, vec![Arg::from("ada@example.com")]).dispatch().await?;
///
/// let worker = queue.worker(WorkerOptions::new())?;
/// worker.run().await?;
/// tokio::signal::ctrl_c().await.ok();
/// worker.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct QueueAdapter {
    creator: Arc<DriverCreator>,
}

impl QueueAdapter {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            creator: Arc::new(DriverCreator::new(Arc::new(config), JobRegistry::new())),
        }
    }

    /// Register a database under a storage connection name
    pub fn with_database(self, name: impl Into<String>, handle: DatabaseHandle) -> Self {
        self.creator.add_database(name, handle);
        self
    }

    /// Register a Redis client under a storage connection name
    pub fn with_redis(self, name: impl Into<String>, client: ::redis::Client) -> Self {
        self.creator.add_redis(name, client);
        self
    }

    /// Register a custom driver under the name connections refer to with `via`
    pub fn with_custom_driver(self, name: impl Into<String>, driver: CustomDriver) -> Self {
        self.creator.add_custom_driver(name, driver);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        self.creator.config()
    }

    pub fn registry(&self) -> &JobRegistry {
        self.creator.registry()
    }

    pub fn creator(&self) -> Arc<DriverCreator> {
        self.creator.clone()
    }

    pub fn register(&self, jobs: Vec<Arc<dyn Job>>) {
        let count = jobs.len();
        self.registry().register(jobs);
        info!("Registered {} jobs", count);
    }

    pub fn job(&self, job: Arc<dyn Job>, args: Vec<Arg>) -> PendingJob {
        PendingJob::new(self.creator.clone(), job, args)
    }

    /// Dispatch a registered job by signature
    pub fn job_by_signature(&self, signature: &str, args: Vec<Arg>) -> QueueResult<PendingJob> {
        let job = self.registry().get(signature)?;
        Ok(self.job(job, args))
    }

    pub fn chain(&self, links: Vec<ChainJob>) -> QueueResult<PendingJob> {
        PendingJob::chain(self.creator.clone(), links)
    }

    /// The driver of a queue connection, for size and clear operations
    pub async fn connection(&self, name: &str) -> QueueResult<Driver> {
        self.creator.create(name).await
    }

    pub fn worker(&self, options: WorkerOptions) -> QueueResult<Worker> {
        Ok(Worker::new(
            self.creator.clone(),
            self.failed_job_provider()?,
            options,
        ))
    }

    /// The database failed-job store when `queue.failed.database` is set,
    /// otherwise one that only logs
    pub fn failed_job_provider(&self) -> QueueResult<Arc<dyn FailedJobProvider>> {
        match self.config().failed_database() {
            Some(name) => {
                let handle = self
                    .creator
                    .database(&name)
                    .ok_or(QueueError::InvalidDatabaseConnection(name))?;
                let provider = DatabaseFailedJobProvider::new(handle, self.config().failed_table())?;
                Ok(Arc::new(provider))
            }
            None => Ok(Arc::new(NullFailedJobProvider)),
        }
    }

    pub fn failer(&self) -> QueueResult<Failer> {
        Ok(Failer::new(self.failed_job_provider()?, self.creator.clone()))
    }

    /// Create the jobs table of every database connection and the failed
    /// jobs table
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> QueueResult<()> {
        for name in self.config().connections() {
            if self.config().driver(&name).as_deref() != Some("database") {
                continue;
            }
            if let Driver::Database(driver) = self.creator.create(&name).await? {
                debug!("Migrating table {} for connection {}", driver.table(), name);
                driver.migrate().await?;
            }
        }

        if let Some(name) = self.config().failed_database() {
            let handle = self
                .creator
                .database(&name)
                .ok_or(QueueError::InvalidDatabaseConnection(name))?;
            DatabaseFailedJobProvider::new(handle, self.config().failed_table())?
                .migrate()
                .await?;
        }
        Ok(())
    }

    /// Number of jobs waiting on a connection's queue
    pub async fn size(&self, connection: &str, queue: &str) -> QueueResult<u64> {
        self.connection(connection).await?.size(queue).await
    }
}
