//! Wiring between configuration, the repository, and the worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lapse_store::AccountRepository;
use lapse_worker::{
    AccountSuspendedEvent, JobError, Scheduler, SchedulerBuilder, SuspensionJob,
    SuspensionJobConfig, SweepMetrics, SweepReport,
};

use crate::config::LapseConfig;
use crate::error::DaemonError;

/// Build the suspension job from `[job]`.
///
/// Returns the job and the receiving end of its suspension events.
///
/// # Errors
///
/// Returns [`DaemonError::Config`] if the threshold is unset or the role is
/// blank, and [`DaemonError::Job`] if the page size is zero.
pub fn build_job(
    config: &LapseConfig,
    repository: Arc<dyn AccountRepository>,
    metrics: Arc<SweepMetrics>,
) -> Result<(SuspensionJob, mpsc::Receiver<AccountSuspendedEvent>), DaemonError> {
    let job_config = SuspensionJobConfig::new(config.job.threshold()?)
        .with_role(config.job.role()?)
        .with_page_size(config.job.page_size);

    let (tx, rx) = mpsc::channel(config.job.event_buffer.max(1));
    let job = SuspensionJob::new(repository, job_config)?
        .with_metrics(metrics)
        .with_suspended_channel(tx);

    Ok((job, rx))
}

/// Build the scheduler for `job` from `[schedule]`.
///
/// # Errors
///
/// Returns [`DaemonError::Job`] if the schedule is invalid.
pub fn build_scheduler(
    config: &LapseConfig,
    job: SuspensionJob,
) -> Result<(Scheduler, mpsc::Sender<()>), DaemonError> {
    let metrics = Arc::clone(job.metrics());
    let built = SchedulerBuilder::new()
        .job(Arc::new(job))
        .schedule(config.schedule.schedule()?)
        .config(config.schedule.scheduler_config())
        .metrics(metrics)
        .build()?;
    Ok(built)
}

/// Run a single sweep, honoring `[schedule] timeout_seconds`.
///
/// # Errors
///
/// Returns [`DaemonError::Job`] if the candidate query fails or the sweep
/// times out.
pub async fn run_once(
    config: &LapseConfig,
    job: &SuspensionJob,
) -> Result<SweepReport, DaemonError> {
    let report = match config.schedule.timeout() {
        Some(limit) => match tokio::time::timeout(limit, job.sweep()).await {
            Ok(result) => result?,
            Err(_) => {
                job.metrics().increment_sweeps_timed_out();
                return Err(JobError::TimedOut(limit).into());
            }
        },
        None => job.sweep().await?,
    };
    Ok(report)
}

/// Log every suspension event until all senders are dropped.
pub fn spawn_event_logger(mut rx: mpsc::Receiver<AccountSuspendedEvent>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut seen = 0u64;
        while let Some(event) = rx.recv().await {
            seen += 1;
            info!(
                account_id = %event.account_id,
                role = %event.role,
                last_activity_at = %event.last_activity_at,
                suspended_at = %event.suspended_at,
                "account suspended for inactivity"
            );
        }
        if seen == 0 {
            warn!("event logger stopped without receiving any suspensions");
        }
        seen
    })
}
