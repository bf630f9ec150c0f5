pub mod error;
pub mod job;
pub mod metrics;
pub mod scheduler;

pub use error::JobError;
pub use job::{
    AccountSuspendedEvent, DEFAULT_PAGE_SIZE, MAX_REPORTED_FAILURES, SuspensionJob,
    SuspensionJobConfig, SweepFailure, SweepReport,
};
pub use metrics::{MetricsSnapshot, SweepMetrics};
pub use scheduler::{Schedule, ScheduledJob, Scheduler, SchedulerBuilder, SchedulerConfig};
