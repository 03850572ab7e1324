pub mod ids;
pub mod arg;
pub mod task;
pub mod reserved;
pub mod failed;

pub use ids::TaskId;
pub use arg::Arg;
pub use task::{ChainJob, Task};
pub use reserved::{ReservationToken, ReservedJob};
pub use failed::FailedJob;
