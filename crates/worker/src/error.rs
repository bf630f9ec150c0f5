use std::time::Duration;

use thiserror::Error;

/// Errors that fail a whole job invocation.
///
/// Failures of individual accounts never surface here; they are recorded in
/// the [`SweepReport`](crate::SweepReport) and the sweep continues.
#[derive(Debug, Error)]
pub enum JobError {
    /// The candidate query could not be served (connectivity loss, broken
    /// paging). The scheduler retries at the next tick.
    #[error("account repository unavailable: {0}")]
    RepositoryUnavailable(#[source] lapse_store::StoreError),

    /// The invocation exceeded the scheduler's timeout and was cancelled.
    #[error("job invocation timed out after {0:?}")]
    TimedOut(Duration),

    /// The job or its schedule was misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),
}
