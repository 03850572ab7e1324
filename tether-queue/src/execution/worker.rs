//! Background processing of one queue on one connection.
//!
//! A [`Worker`] runs `concurrent` poll loops. Each loop pops a job, runs its
//! handler through the registry and then deletes, releases or fails the job.
//! Failed jobs go through a bounded channel to a single task that hands them
//! to the [`FailedJobProvider`]. Shutdown cancels the loops between jobs; a
//! handler that already started always runs to completion.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, INITIAL_DELAY, MAX_DELAY};
use crate::backend::{Driver, DriverCreator, QueueDriver};
use crate::failer::FailedJobProvider;
use crate::observability::WorkerMetrics;
use crate::{FailedJob, JobError, JobRegistry, QueueError, QueueResult, ReservedJob};

/// Overrides for a worker; anything left unset comes from the connection's config
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    pub connection: Option<String>,
    pub queue: Option<String>,
    pub concurrent: Option<usize>,
    pub backoff: Option<(Duration, Duration)>,
}

impl WorkerOptions {
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

    pub fn concurrent(mut self, concurrent: usize) -> Self {
        self.concurrent = Some(concurrent.max(1));
        self
    }

    /// First and largest delay between empty pops
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = Some((initial, max));
        self
    }
}

struct Running {
    loops: Vec<JoinHandle<()>>,
    drain: JoinHandle<()>,
    failed_tx: mpsc::Sender<FailedJob>,
}

pub struct Worker {
    creator: Arc<DriverCreator>,
    failed_jobs: Arc<dyn FailedJobProvider>,
    connection: String,
    queue: String,
    concurrent: usize,
    backoff: Backoff,
    shutdown: CancellationToken,
    metrics: Arc<WorkerMetrics>,
    running: Mutex<Option<Running>>,
}

impl Worker {
    pub fn new(
        creator: Arc<DriverCreator>,
        failed_jobs: Arc<dyn FailedJobProvider>,
        options: WorkerOptions,
    ) -> Self {
        let config = creator.config();
        let connection = options
            .connection
            .unwrap_or_else(|| config.default_connection());
        let queue = options
            .queue
            .unwrap_or_else(|| config.default_queue(&connection));
        let concurrent = options
            .concurrent
            .unwrap_or_else(|| config.concurrent(&connection));
        let (initial, max) = options.backoff.unwrap_or((INITIAL_DELAY, MAX_DELAY));

        Self {
            creator,
            failed_jobs,
            connection,
            queue,
            concurrent,
            backoff: Backoff::new(initial, max),
            shutdown: CancellationToken::new(),
            metrics: Arc::new(WorkerMetrics::new()),
            running: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn concurrent(&self) -> usize {
        self.concurrent
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start the poll loops and return once they are spawned.
    ///
    /// Fails with `DriverSyncNotNeedToRun` on a sync connection.
    pub async fn run(&self) -> QueueResult<()> {
        if self.is_shutdown() {
            return Err(QueueError::WorkerShutdown);
        }

        let driver = self.creator.create(&self.connection).await?;
        if driver.is_sync() {
            return Err(QueueError::DriverSyncNotNeedToRun(self.connection.clone()));
        }
        let driver = Arc::new(driver);

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(QueueError::Internal("worker is already running".to_string()));
        }

        let (failed_tx, failed_rx) = mpsc::channel(1);
        let drain = tokio::spawn(drain_failed_jobs(
            failed_rx,
            self.failed_jobs.clone(),
            self.metrics.clone(),
        ));

        let loops = (0..self.concurrent)
            .map(|id| {
                let poll = PollLoop {
                    id,
                    driver: driver.clone(),
                    registry: self.creator.registry().clone(),
                    connection: self.connection.clone(),
                    queue: self.queue.clone(),
                    failed_tx: failed_tx.clone(),
                    shutdown: self.shutdown.clone(),
                    metrics: self.metrics.clone(),
                    backoff: self.backoff.clone(),
                };
                tokio::spawn(poll.run())
            })
            .collect();

        info!(
            "Worker started on {}/{} with {} poll loops ({} driver)",
            self.connection,
            self.queue,
            self.concurrent,
            driver.driver_name()
        );

        *running = Some(Running {
            loops,
            drain,
            failed_tx,
        });
        Ok(())
    }

    /// Stop polling, wait for in-flight jobs and flush pending failed jobs.
    ///
    /// Safe to call before `run` and more than once.
    pub async fn shutdown(&self) -> QueueResult<()> {
        self.shutdown.cancel();

        let running = self.running.lock().take();
        let Some(Running {
            loops,
            drain,
            failed_tx,
        }) = running
        else {
            return Ok(());
        };

        for handle in loops {
            if let Err(e) = handle.await {
                error!("Poll loop on {}/{} ended abnormally: {}", self.connection, self.queue, e);
            }
        }

        // Every loop has dropped its sender; closing ours ends the drain task
        drop(failed_tx);
        if let Err(e) = drain.await {
            error!("Failed job drain on {} ended abnormally: {}", self.connection, e);
        }

        info!("Worker on {}/{} shut down", self.connection, self.queue);
        Ok(())
    }
}

async fn drain_failed_jobs(
    mut failed_rx: mpsc::Receiver<FailedJob>,
    provider: Arc<dyn FailedJobProvider>,
    metrics: Arc<WorkerMetrics>,
) {
    while let Some(failed) = failed_rx.recv().await {
        match provider.record(&failed).await {
            Ok(()) => debug!("Recorded failed job {}", failed.uuid),
            Err(e) => {
                metrics.record_failed_record_dropped();
                error!(
                    "Could not record failed job {} from {}/{}: {}",
                    failed.uuid, failed.connection, failed.queue, e
                );
            }
        }
    }
}

enum Outcome {
    Done,
    Release(Duration),
    Failed(String),
}

struct PollLoop {
    id: usize,
    driver: Arc<Driver>,
    registry: JobRegistry,
    connection: String,
    queue: String,
    failed_tx: mpsc::Sender<FailedJob>,
    shutdown: CancellationToken,
    metrics: Arc<WorkerMetrics>,
    backoff: Backoff,
}

impl PollLoop {
    async fn run(mut self) {
        debug!("Poll loop {} on {}/{} started", self.id, self.connection, self.queue);

        while !self.shutdown.is_cancelled() {
            // A pop that finishes in the same poll as the cancellation wins, so
            // its reservation is processed. A pop cut off mid-flight may leave
            // a reservation behind, which expires after retry_after.
            let popped = tokio::select! {
                biased;
                popped = self.driver.pop(&self.queue) => popped,
                _ = self.shutdown.cancelled() => break,
            };

            match popped {
                Ok(job) => {
                    self.backoff.reset();
                    self.process(job).await;
                }
                Err(e) => {
                    if !e.is_no_job_found() {
                        self.metrics.record_pop_error();
                        warn!("Pop from {}/{} failed: {}", self.connection, self.queue, e);
                    }
                    let delay = self.backoff.next_delay();
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        debug!("Poll loop {} on {}/{} stopped", self.id, self.connection, self.queue);
    }

    async fn execute(&self, job: &ReservedJob) -> Outcome {
        let call = self.registry.call(job.signature(), job.task.head.args.clone());
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => Outcome::Done,
            Ok(Err(QueueError::JobFailed(JobError::Release(delay)))) => Outcome::Release(delay),
            Ok(Err(QueueError::JobFailed(JobError::Failed(message)))) => Outcome::Failed(message),
            Ok(Err(other)) => Outcome::Failed(other.to_string()),
            Err(_) => Outcome::Failed(format!("job {} panicked", job.signature())),
        }
    }

    async fn process(&self, job: ReservedJob) {
        let signature = job.signature().to_string();
        debug!(
            "Processing job {} ({}) attempt {}",
            job.uuid(),
            signature,
            job.attempts
        );

        let started = Instant::now();
        let outcome = self.execute(&job).await;
        let took = started.elapsed();

        match outcome {
            Outcome::Done => {
                self.metrics.record_processed(&signature, took);
                if let Some(next) = job.task.next_in_chain() {
                    if let Err(e) = self.driver.push(&next, &self.queue).await {
                        error!("Could not push next job of chain {}: {}", job.uuid(), e);
                    }
                }
                self.delete(&job).await;
            }
            Outcome::Release(delay) => {
                self.metrics.record_released(&signature, took);
                debug!("Releasing job {} for {:?}", job.uuid(), delay);
                if let Err(e) = self.driver.release(&self.queue, &job, delay).await {
                    error!("Could not release job {}: {}", job.uuid(), e);
                }
            }
            Outcome::Failed(exception) => {
                self.metrics.record_failed(&signature, took);
                warn!("Job {} ({}) failed: {}", job.uuid(), signature, exception);
                let failed = FailedJob::new(
                    job.uuid(),
                    self.connection.as_str(),
                    self.queue.as_str(),
                    job.payload.as_str(),
                    exception,
                );
                if self.failed_tx.send(failed).await.is_err() {
                    self.metrics.record_failed_record_dropped();
                    error!("Failed job channel closed, job {} not recorded", job.uuid());
                }
                self.delete(&job).await;
            }
        }
    }

    async fn delete(&self, job: &ReservedJob) {
        if let Err(e) = self.driver.delete(&self.queue, job).await {
            error!("Could not delete job {}: {}", job.uuid(), e);
        }
    }
}
