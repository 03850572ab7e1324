mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{as_job, database_config, database_queue, eventually, wait_until, Behaviour, RecordingJob};
use tether_queue::{
    Arg, ChainJob, CustomDriver, Job, QueueAdapter, QueueConfig, QueueDriver, QueueError,
    QueueResult, ReservationToken, ReservedJob, Task, WorkerOptions,
};

const WAIT: Duration = Duration::from_secs(10);

fn fast_options() -> WorkerOptions {
    WorkerOptions::new().backoff(Duration::from_millis(10), Duration::from_millis(50))
}

#[tokio::test]
async fn test_shutdown_without_run() {
    let queue = database_queue(database_config()).await;
    let worker = queue.worker(fast_options()).unwrap();

    worker.shutdown().await.unwrap();
    assert!(worker.is_shutdown());
    assert!(!worker.is_running());
}

/// Shutdown returns promptly even though no job was ever popped
#[tokio::test]
async fn test_shutdown_after_idle_run() {
    let queue = database_queue(database_config()).await;
    let worker = queue.worker(WorkerOptions::new().concurrent(3)).unwrap();

    worker.run().await.unwrap();
    assert!(worker.is_running());
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), worker.shutdown())
        .await
        .expect("shutdown deadlocked")
        .unwrap();
    assert!(worker.is_shutdown());
    assert!(!worker.is_running());
}

#[tokio::test]
async fn test_sync_connection_refuses_to_run() {
    let queue = QueueAdapter::new(QueueConfig::new().with("queue.connections.sync.driver", "sync"));
    let worker = queue.worker(WorkerOptions::new().connection("sync")).unwrap();

    let err = worker.run().await.unwrap_err();
    assert!(matches!(err, QueueError::DriverSyncNotNeedToRun(ref c) if c == "sync"));
}

#[tokio::test]
async fn test_run_twice_and_after_shutdown() {
    let queue = database_queue(database_config()).await;
    let worker = queue.worker(fast_options()).unwrap();

    worker.run().await.unwrap();
    assert!(matches!(worker.run().await, Err(QueueError::Internal(_))));

    worker.shutdown().await.unwrap();
    assert!(matches!(worker.run().await, Err(QueueError::WorkerShutdown)));
}

#[test]
fn test_options_fall_back_to_config() {
    let config = QueueConfig::new()
        .with("queue.default", "database")
        .with("queue.connections.database.driver", "database")
        .with("queue.connections.database.concurrent", "3")
        .with("queue.connections.database.queue", "emails");
    let queue = QueueAdapter::new(config);

    let worker = queue.worker(WorkerOptions::new()).unwrap();
    assert_eq!(worker.connection(), "database");
    assert_eq!(worker.queue(), "emails");
    assert_eq!(worker.concurrent(), 3);

    let worker = queue
        .worker(WorkerOptions::new().queue("reports").concurrent(0))
        .unwrap();
    assert_eq!(worker.queue(), "reports");
    assert_eq!(worker.concurrent(), 1);

    // Failed jobs database configured but never registered
    let queue = QueueAdapter::new(database_config());
    assert!(matches!(
        queue.worker(WorkerOptions::new()),
        Err(QueueError::InvalidDatabaseConnection(ref name)) if name == "default"
    ));
}

/// Successful jobs are deleted; failing ones are deleted and recorded
#[tokio::test]
async fn test_processes_and_records_failures() {
    let queue = database_queue(database_config()).await;
    let ok = RecordingJob::succeeding("job_ok");
    let bad = RecordingJob::failing("job_bad", "boom");
    queue.register(vec![as_job(&ok), as_job(&bad)]);

    queue.job(as_job(&ok), vec![Arg::Int(1)]).dispatch().await.unwrap();
    queue.job(as_job(&bad), vec![Arg::Int(2)]).dispatch().await.unwrap();
    queue.job(as_job(&ok), vec![Arg::Int(3)]).dispatch().await.unwrap();

    let worker = queue.worker(fast_options().concurrent(2)).unwrap();
    worker.run().await.unwrap();

    let failer = queue.failer().unwrap();
    assert!(wait_until(WAIT, || ok.call_count() == 2 && bad.call_count() == 1).await);
    assert!(
        eventually(WAIT, || {
            let failer = failer.clone();
            async move { failer.all().await.unwrap().len() == 1 }
        })
        .await
    );
    worker.shutdown().await.unwrap();

    let failed = failer.all().await.unwrap();
    assert_eq!(failed[0].job.exception, "boom");
    assert_eq!(failed[0].job.connection, "database");
    assert_eq!(failed[0].job.queue, "default");
    assert!(failed[0].job.payload.contains("job_bad"));
    assert_eq!(queue.size("database", "default").await.unwrap(), 0);

    let metrics = worker.metrics().snapshot();
    assert_eq!(metrics.jobs_processed, 2);
    assert_eq!(metrics.jobs_failed, 1);
    assert_eq!(metrics.failed_records_dropped, 0);
}

/// Chained jobs run in order, one dispatch after the other
#[tokio::test]
async fn test_chain_runs_link_by_link() {
    let queue = database_queue(database_config()).await;
    let one = RecordingJob::succeeding("job_one");
    let two = RecordingJob::succeeding("job_two");
    let three = RecordingJob::succeeding("job_three");
    queue.register(vec![as_job(&one), as_job(&two), as_job(&three)]);

    queue
        .chain(vec![
            ChainJob::new(as_job(&one), vec![Arg::from("one")]),
            ChainJob::new(as_job(&two), vec![Arg::from("two")]),
            ChainJob::new(as_job(&three), vec![Arg::from("three")]),
        ])
        .unwrap()
        .dispatch()
        .await
        .unwrap();

    // Only the head is stored until it has run
    assert_eq!(queue.size("database", "default").await.unwrap(), 1);

    let worker = queue.worker(fast_options()).unwrap();
    worker.run().await.unwrap();
    assert!(wait_until(WAIT, || three.call_count() == 1).await);
    worker.shutdown().await.unwrap();

    assert_eq!(one.last_args(), Some(vec![Arg::from("one")]));
    assert_eq!(two.last_args(), Some(vec![Arg::from("two")]));
    assert_eq!(three.last_args(), Some(vec![Arg::from("three")]));
    assert_eq!(queue.size("database", "default").await.unwrap(), 0);
}

/// A failing link records a failure and drops the rest of the chain
#[tokio::test]
async fn test_chain_stops_at_failed_link() {
    let queue = database_queue(database_config()).await;
    let bad = RecordingJob::failing("job_bad", "broken link");
    let never = RecordingJob::succeeding("job_never");
    queue.register(vec![as_job(&bad), as_job(&never)]);

    queue
        .chain(vec![
            ChainJob::new(as_job(&bad), vec![]),
            ChainJob::new(as_job(&never), vec![]),
        ])
        .unwrap()
        .dispatch()
        .await
        .unwrap();

    let worker = queue.worker(fast_options()).unwrap();
    worker.run().await.unwrap();
    let failer = queue.failer().unwrap();
    assert!(
        eventually(WAIT, || {
            let failer = failer.clone();
            async move { failer.all().await.unwrap().len() == 1 }
        })
        .await
    );
    worker.shutdown().await.unwrap();

    assert_eq!(never.call_count(), 0);
    assert_eq!(queue.size("database", "default").await.unwrap(), 0);
}

/// A job asking to be released is put back and handled again
#[tokio::test]
async fn test_release_puts_job_back() {
    let queue = database_queue(database_config()).await;
    let flaky = RecordingJob::new("job_flaky", Behaviour::ReleaseTimes(2, Duration::ZERO));
    queue.register(vec![as_job(&flaky)]);

    queue.job(as_job(&flaky), vec![Arg::Int(5)]).dispatch().await.unwrap();

    let worker = queue.worker(fast_options()).unwrap();
    worker.run().await.unwrap();
    assert!(wait_until(WAIT, || flaky.call_count() == 3).await);
    worker.shutdown().await.unwrap();

    assert!(flaky.calls().iter().all(|args| args == &vec![Arg::Int(5)]));
    assert_eq!(worker.metrics().jobs_released(), 2);
    assert_eq!(worker.metrics().jobs_processed(), 1);
    assert!(queue.failer().unwrap().all().await.unwrap().is_empty());

    let driver = queue.connection("database").await.unwrap();
    assert_eq!(driver.size("default").await.unwrap(), 0);
}

/// Without a failed jobs database, failures are only logged
#[tokio::test]
async fn test_failures_without_failed_database() {
    let config = QueueConfig::new()
        .with("queue.default", "database")
        .with("queue.connections.database.driver", "database");
    let queue = database_queue(config).await;
    let bad = RecordingJob::failing("job_bad", "boom");
    queue.register(vec![as_job(&bad)]);

    queue.job(as_job(&bad), vec![]).dispatch().await.unwrap();

    let worker = queue.worker(fast_options()).unwrap();
    worker.run().await.unwrap();
    let metrics = worker.metrics();
    assert!(wait_until(WAIT, || metrics.jobs_failed() == 1).await);
    worker.shutdown().await.unwrap();

    assert!(queue.failer().unwrap().all().await.unwrap().is_empty());
    assert_eq!(queue.size("database", "default").await.unwrap(), 0);
}

/// Driver whose queue never runs dry
struct EndlessDriver {
    job: Arc<dyn Job>,
    deleted: AtomicUsize,
}

#[async_trait]
impl QueueDriver for EndlessDriver {
    fn connection(&self) -> &str {
        "endless"
    }

    fn driver_name(&self) -> &'static str {
        "endless"
    }

    async fn push(&self, _task: &Task, _queue: &str) -> QueueResult<()> {
        Ok(())
    }

    async fn pop(&self, _queue: &str) -> QueueResult<ReservedJob> {
        tokio::task::yield_now().await;
        Ok(ReservedJob::new(
            Task::new(self.job.clone(), vec![]),
            1,
            String::new(),
            ReservationToken::Custom("endless".to_string()),
        ))
    }

    async fn delete(&self, _queue: &str, _job: &ReservedJob) -> QueueResult<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self, _queue: &str, _job: &ReservedJob, _delay: Duration) -> QueueResult<()> {
        Ok(())
    }

    async fn size(&self, _queue: &str) -> QueueResult<u64> {
        Ok(u64::MAX)
    }

    async fn clear(&self, _queue: &str) -> QueueResult<u64> {
        Ok(0)
    }
}

/// Shutdown stops a worker whose pops always succeed, and every job it
/// popped was finished and deleted
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_a_busy_worker() {
    let job = RecordingJob::succeeding("job_one");
    let driver = Arc::new(EndlessDriver {
        job: as_job(&job),
        deleted: AtomicUsize::new(0),
    });
    let config = QueueConfig::new()
        .with("queue.connections.endless.driver", "custom")
        .with("queue.connections.endless.via", "endless");
    let queue = QueueAdapter::new(config)
        .with_custom_driver("endless", CustomDriver::Instance(driver.clone()));
    queue.register(vec![as_job(&job)]);

    let worker = queue
        .worker(fast_options().connection("endless").concurrent(2))
        .unwrap();
    worker.run().await.unwrap();
    assert!(wait_until(WAIT, || driver.deleted.load(Ordering::SeqCst) >= 3).await);

    tokio::time::timeout(Duration::from_secs(5), worker.shutdown())
        .await
        .expect("busy worker never stopped")
        .unwrap();

    let deleted = driver.deleted.load(Ordering::SeqCst);
    assert_eq!(job.call_count(), deleted);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.deleted.load(Ordering::SeqCst), deleted);
}
