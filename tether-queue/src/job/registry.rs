use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::{Arg, Job, QueueError, QueueResult};

/// Concurrent map from job signature to handler.
///
/// Cheap to clone; clones share the same map. Written during boot, read by
/// workers, pending jobs and the failer while they run.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: Arc<DashMap<String, Arc<dyn Job>>>,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register jobs under their signatures. A later registration of the same
    /// signature replaces the earlier one.
    pub fn register(&self, jobs: Vec<Arc<dyn Job>>) {
        for job in jobs {
            let signature = job.signature().to_string();
            debug!(signature = %signature, "Registered job");
            self.handlers.insert(signature, job);
        }
    }

    /// Look up a job by signature
    pub fn get(&self, signature: &str) -> QueueResult<Arc<dyn Job>> {
        self.handlers
            .get(signature)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| QueueError::JobNotFound(signature.to_string()))
    }

    /// Look up a job and run it with `args`
    pub async fn call(&self, signature: &str, args: Vec<Arg>) -> QueueResult<()> {
        let job = self.get(signature)?;
        job.handle(args).await.map_err(QueueError::JobFailed)
    }

    /// Check if a signature is registered
    pub fn is_registered(&self, signature: &str) -> bool {
        self.handlers.contains_key(signature)
    }

    /// Snapshot of all registered jobs, in no particular order
    pub fn all(&self) -> Vec<Arc<dyn Job>> {
        self.handlers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
