//! Inspection and retry of jobs whose handler failed.

pub mod provider;

pub use provider::{
    DatabaseFailedJobProvider, FailedJobFilter, FailedJobProvider, NullFailedJobProvider,
};

use std::sync::Arc;

use tracing::{info, instrument};

use crate::backend::{DriverCreator, QueueDriver};
use crate::codec::JsonCodec;
use crate::{FailedJob, QueueError, QueueResult};

/// Entry point for listing, retrying and forgetting failed jobs
#[derive(Clone)]
pub struct Failer {
    provider: Arc<dyn FailedJobProvider>,
    creator: Arc<DriverCreator>,
}

impl Failer {
    pub fn new(provider: Arc<dyn FailedJobProvider>, creator: Arc<DriverCreator>) -> Self {
        Self { provider, creator }
    }

    pub fn provider(&self) -> Arc<dyn FailedJobProvider> {
        self.provider.clone()
    }

    pub async fn all(&self) -> QueueResult<Vec<FailedJobView>> {
        let jobs = self.provider.all().await?;
        Ok(self.views(jobs))
    }

    pub async fn get(&self, filter: &FailedJobFilter) -> QueueResult<Vec<FailedJobView>> {
        let jobs = self.provider.find(filter).await?;
        Ok(self.views(jobs))
    }

    /// The oldest failure recorded for a dispatch
    pub async fn find(&self, uuid: &str) -> QueueResult<FailedJobView> {
        let filter = FailedJobFilter::new().uuids([uuid]);
        self.get(&filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::FailedJobNotFound(uuid.to_string()))
    }

    pub async fn forget(&self, uuid: &str) -> QueueResult<bool> {
        Ok(self.provider.forget(uuid).await? > 0)
    }

    pub async fn flush(&self) -> QueueResult<u64> {
        self.provider.flush().await
    }

    /// Retry every failed job matching `filter`, stopping at the first error.
    /// Returns how many were pushed.
    pub async fn retry_matching(&self, filter: &FailedJobFilter) -> QueueResult<usize> {
        let views = self.get(filter).await?;
        for view in &views {
            view.retry().await?;
        }
        Ok(views.len())
    }

    fn views(&self, jobs: Vec<FailedJob>) -> Vec<FailedJobView> {
        jobs.into_iter()
            .map(|job| FailedJobView {
                job,
                failer: self.clone(),
            })
            .collect()
    }

    /// Push the stored payload back onto its original connection and queue,
    /// then delete the failed record. A crash in between leaves both.
    #[instrument(skip(self, job), fields(uuid = %job.uuid, connection = %job.connection))]
    async fn retry_job(&self, job: &FailedJob) -> QueueResult<()> {
        let driver = self.creator.create(&job.connection).await?;
        let task = JsonCodec.decode(&job.payload, self.creator.registry())?;
        driver.push(&task, &job.queue).await?;

        if let Some(id) = job.id {
            self.provider.delete(id).await?;
        }
        info!("Retried failed job {} on {}/{}", job.uuid, job.connection, job.queue);
        Ok(())
    }
}

/// A failed job together with what is needed to retry it
#[derive(Clone)]
pub struct FailedJobView {
    pub job: FailedJob,
    failer: Failer,
}

impl FailedJobView {
    pub async fn retry(&self) -> QueueResult<()> {
        self.failer.retry_job(&self.job).await
    }

    pub fn uuid(&self) -> &str {
        &self.job.uuid
    }
}

impl std::fmt::Debug for FailedJobView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailedJobView").field("job", &self.job).finish()
    }
}
