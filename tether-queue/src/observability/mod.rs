pub mod metrics;
pub mod tracing;

pub use metrics::{JobTypeMetrics, MetricsSnapshot, WorkerMetrics};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
