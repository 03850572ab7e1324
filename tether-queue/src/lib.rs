//! # tether-queue: background jobs over sync, database and Redis drivers
//!
//! Jobs are plain types implementing [`Job`], registered once by signature.
//! A dispatch serializes the job's signature and typed [`Arg`]s into a JSON
//! envelope and hands it to the driver of a named connection; a [`Worker`]
//! pops it back, resolves the handler through the [`JobRegistry`] and runs it.
//!
//! ## Features
//!
//! - **Drivers**: `sync` runs jobs inline, `database` stores rows in
//!   PostgreSQL or SQLite, `redis` uses Lua scripts over lists and sorted
//!   sets, `custom` plugs in any [`QueueDriver`]
//! - **Chains**: jobs run one after another, each only if the previous succeeded
//! - **Delays**: absolute wake times per job and per chain link
//! - **Workers**: concurrent poll loops with exponential backoff and graceful shutdown
//! - **Failed jobs**: recorded with their payload and error, listed, retried or forgotten
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use tether_queue::prelude::*;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Job for Greet {
//!     fn signature(&self) -> &str {
//!         "greet"
//!     }
//!
//!     async fn handle(&self, args: Vec<Arg>) -> Result<(), JobError> {
//!         match args.first().and_then(Arg::as_str) {
//!             Some(_) => Ok(()),
//!             None => Err(JobError::failed("missing name")),
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let queue = QueueAdapter::new(QueueConfig::new().with("queue.connections.sync.driver", "sync"));
//! let greet: Arc<dyn Job> = Arc::new(Greet);
//! queue.register(vec![greet.clone()]);
//!
//! queue.job(greet.clone(), vec![Arg::from("ada")]).dispatch().await.unwrap();
//! assert!(queue.job(greet, vec![]).dispatch_sync().await.is_err());
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod execution;
pub mod failer;
pub mod job;
pub mod observability;
pub mod pending;
pub mod types;

pub use adapter::QueueAdapter;
pub use backend::{
    CustomDriver, DatabaseDriver, DatabaseHandle, Dialect, Driver, DriverCreator, QueueDriver,
    RedisDriver, SyncDriver,
};
pub use codec::{JsonCodec, TaskEnvelope};
pub use config::QueueConfig;
pub use error::{JobError, QueueError, QueueResult};
pub use execution::{Worker, WorkerOptions};
pub use failer::{
    DatabaseFailedJobProvider, FailedJobFilter, FailedJobProvider, FailedJobView, Failer,
    NullFailedJobProvider,
};
pub use job::{Job, JobRegistry};
pub use observability::{MetricsSnapshot, WorkerMetrics};
pub use pending::PendingJob;
pub use types::{Arg, ChainJob, FailedJob, ReservationToken, ReservedJob, Task, TaskId};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

/// Everything needed to define, dispatch and process jobs
pub mod prelude {
    pub use crate::{
        Arg, ChainJob, DatabaseHandle, Job, JobError, QueueAdapter, QueueConfig, QueueDriver,
        QueueError, QueueResult, Worker, WorkerOptions,
    };

    pub use async_trait::async_trait;
}
