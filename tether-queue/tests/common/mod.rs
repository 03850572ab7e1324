#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::any::AnyPoolOptions;

use tether_queue::{Arg, DatabaseHandle, Job, JobError, QueueAdapter, QueueConfig};

/// What a [`RecordingJob`] does when handled
#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    Fail(&'static str),
    /// Ask to be released this many times, then succeed
    ReleaseTimes(usize, Duration),
}

/// Test job remembering every argument list it was handled with
pub struct RecordingJob {
    signature: &'static str,
    behaviour: Behaviour,
    calls: Mutex<Vec<Vec<Arg>>>,
    releases: AtomicUsize,
}

impl RecordingJob {
    pub fn new(signature: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            signature,
            behaviour,
            calls: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn succeeding(signature: &'static str) -> Arc<Self> {
        Self::new(signature, Behaviour::Succeed)
    }

    pub fn failing(signature: &'static str, message: &'static str) -> Arc<Self> {
        Self::new(signature, Behaviour::Fail(message))
    }

    pub fn calls(&self) -> Vec<Vec<Arg>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Arguments of the last call; `None` if never called
    pub fn last_args(&self) -> Option<Vec<Arg>> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl Job for RecordingJob {
    fn signature(&self) -> &str {
        self.signature
    }

    async fn handle(&self, args: Vec<Arg>) -> Result<(), JobError> {
        self.calls.lock().push(args);
        match &self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail(message) => Err(JobError::failed(*message)),
            Behaviour::ReleaseTimes(times, delay) => {
                if self.releases.fetch_add(1, Ordering::SeqCst) < *times {
                    Err(JobError::release(*delay))
                } else {
                    Ok(())
                }
            }
        }
    }
}

pub fn as_job(job: &Arc<RecordingJob>) -> Arc<dyn Job> {
    job.clone()
}

/// Fresh in-memory SQLite database. One connection keeps the database alive
/// and serializes access.
pub async fn sqlite_handle() -> DatabaseHandle {
    let options = AnyPoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None);
    DatabaseHandle::connect_with(options, "sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}

/// SQLite database in a file under `dir`, shared by a pool of `connections`
/// connections so concurrent pops really run side by side
pub async fn file_sqlite_handle(dir: &Path, connections: u32) -> DatabaseHandle {
    let url = format!("sqlite://{}?mode=rwc", dir.join("queue.db").display());
    let options = AnyPoolOptions::new().max_connections(connections);
    DatabaseHandle::connect_with(options, &url)
        .await
        .expect("file-backed sqlite")
}

/// Config with a `database` connection and failed jobs stored in the same database
pub fn database_config() -> QueueConfig {
    QueueConfig::new()
        .with("queue.default", "database")
        .with("queue.connections.database.driver", "database")
        .with("queue.connections.database.connection", "default")
        .with("queue.connections.database.queue", "default")
        .with("queue.connections.database.retry_after", "60")
        .with("queue.connections.sync.driver", "sync")
        .with("queue.failed.database", "default")
        .with("queue.failed.table", "failed_jobs")
}

/// Adapter over a migrated in-memory database
pub async fn database_queue(config: QueueConfig) -> QueueAdapter {
    let queue = QueueAdapter::new(config).with_database("default", sqlite_handle().await);
    queue.migrate().await.expect("migrate");
    queue
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    eventually(timeout, || {
        let holds = condition();
        async move { holds }
    })
    .await
}

/// Async form of [`wait_until`]; the returned future must own what it uses
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
