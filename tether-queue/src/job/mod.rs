pub mod registry;

pub use registry::JobRegistry;

use crate::{Arg, JobError};
use async_trait::async_trait;

/// A unit of background work supplied by application code.
///
/// Jobs are registered once at boot and looked up by [`Job::signature`] when a
/// serialized task comes back from a driver.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Globally unique key used by the registry and the wire format
    fn signature(&self) -> &str;

    /// Execute the job with the arguments it was dispatched with
    async fn handle(&self, args: Vec<Arg>) -> Result<(), JobError>;
}
