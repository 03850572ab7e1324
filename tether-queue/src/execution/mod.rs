pub mod backoff;
pub mod worker;

pub use backoff::Backoff;
pub use worker::{Worker, WorkerOptions};
