//! In-process scheduler that invokes a job on a fixed interval or a cron
//! expression until shutdown is signaled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::JobError;
use crate::job::SuspensionJob;
use crate::metrics::SweepMetrics;

/// A job the scheduler can invoke.
///
/// `run` must be safe to call again after a failed or cancelled invocation.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Perform one invocation.
    async fn run(&self) -> Result<(), JobError>;
}

#[async_trait]
impl ScheduledJob for SuspensionJob {
    fn name(&self) -> &str {
        "suspend_inactive_accounts"
    }

    async fn run(&self) -> Result<(), JobError> {
        self.sweep().await.map(|_| ())
    }
}

/// When the scheduler fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fire every `Duration`, measured from the previous tick.
    Interval(Duration),
    /// Fire on each occurrence of a cron expression in a timezone.
    Cron {
        cron: croner::Cron,
        timezone: chrono_tz::Tz,
    },
}

impl Schedule {
    /// A fixed-period schedule. The period must be non-zero.
    pub fn interval(period: Duration) -> Result<Self, JobError> {
        if period.is_zero() {
            return Err(JobError::Configuration("schedule interval must be non-zero".into()));
        }
        Ok(Self::Interval(period))
    }

    /// A cron schedule evaluated in the given IANA timezone.
    pub fn cron(expr: &str, timezone: &str) -> Result<Self, JobError> {
        let cron = croner::Cron::new(expr)
            .parse()
            .map_err(|e| JobError::Configuration(format!("invalid cron expression: {e}")))?;
        let timezone = timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| JobError::Configuration(format!("invalid timezone: {timezone}")))?;
        Ok(Self::Cron { cron, timezone })
    }

    /// Next wall-clock firing strictly after `after`, or `None` if the
    /// schedule has no future occurrences.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|p| after.checked_add_signed(p)),
            Self::Cron { cron, timezone } => {
                let local = after.with_timezone(timezone);
                cron.find_next_occurrence(&local, false)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }

    /// Monotonic deadline of the next tick.
    ///
    /// Interval schedules advance from the previous deadline so run time does
    /// not accumulate drift; ticks missed while a run overran are skipped.
    fn next_deadline(&self, previous: Option<Instant>, now: Instant) -> Option<Instant> {
        match self {
            Self::Interval(period) => {
                let next = previous.map_or(now + *period, |p| p + *period);
                Some(if next <= now { now + *period } else { next })
            }
            Self::Cron { .. } => {
                let wall = Utc::now();
                let at = self.next_after(wall)?;
                Some(now + (at - wall).to_std().unwrap_or_default())
            }
        }
    }
}

/// Scheduler behavior beyond the schedule itself.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Invoke the job once immediately at startup.
    pub run_on_start: bool,
    /// Cancel an invocation that runs longer than this.
    pub job_timeout: Option<Duration>,
}

/// Drives a [`ScheduledJob`] until shutdown.
///
/// Invocations are sequential: a tick never starts while the previous
/// invocation is still running. A failed invocation is retried at the next
/// tick.
pub struct Scheduler {
    job: Arc<dyn ScheduledJob>,
    schedule: Schedule,
    config: SchedulerConfig,
    metrics: Arc<SweepMetrics>,
    shutdown_rx: mpsc::Receiver<()>,
    consecutive_failures: u32,
}

impl Scheduler {
    /// Number of failed invocations since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run the scheduler until shutdown is signaled.
    ///
    /// Shutdown also cancels an invocation in progress; the job is re-run
    /// from scratch next time, which per-account idempotence makes safe.
    pub async fn run(&mut self) {
        info!(job = %self.job.name(), schedule = ?self.schedule, "scheduler starting");

        if self.config.run_on_start && self.run_until_shutdown().await {
            info!(job = %self.job.name(), "scheduler stopped");
            return;
        }

        let mut previous: Option<Instant> = None;
        loop {
            let Some(deadline) = self.schedule.next_deadline(previous, Instant::now()) else {
                warn!(job = %self.job.name(), "schedule has no future occurrences");
                break;
            };

            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!(job = %self.job.name(), "scheduler received shutdown signal");
                    break;
                }
                () = tokio::time::sleep_until(deadline) => {
                    previous = Some(deadline);
                    if self.run_until_shutdown().await {
                        break;
                    }
                }
            }
        }

        info!(job = %self.job.name(), "scheduler stopped");
    }

    /// Perform exactly one invocation, applying the configured timeout.
    pub async fn run_once(&mut self) -> Result<(), JobError> {
        let result = invoke(self.job.as_ref(), self.config.job_timeout, &self.metrics).await;
        self.record(&result);
        result
    }

    /// Run one invocation unless shutdown arrives first. Returns `true` on
    /// shutdown.
    async fn run_until_shutdown(&mut self) -> bool {
        let result = tokio::select! {
            _ = self.shutdown_rx.recv() => None,
            result = invoke(self.job.as_ref(), self.config.job_timeout, &self.metrics) => {
                Some(result)
            }
        };

        match result {
            Some(result) => {
                self.record(&result);
                false
            }
            None => {
                warn!(job = %self.job.name(), "shutdown requested, invocation cancelled");
                true
            }
        }
    }

    fn record(&mut self, result: &Result<(), JobError>) {
        match result {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    info!(
                        job = %self.job.name(),
                        previous_failures = self.consecutive_failures,
                        "job recovered"
                    );
                }
                self.consecutive_failures = 0;
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                error!(
                    job = %self.job.name(),
                    error = %e,
                    consecutive_failures = self.consecutive_failures,
                    "job invocation failed, retrying at next tick"
                );
            }
        }
    }
}

async fn invoke(
    job: &dyn ScheduledJob,
    timeout: Option<Duration>,
    metrics: &SweepMetrics,
) -> Result<(), JobError> {
    let Some(limit) = timeout else {
        return job.run().await;
    };
    if let Ok(result) = tokio::time::timeout(limit, job.run()).await {
        result
    } else {
        metrics.increment_sweeps_timed_out();
        Err(JobError::TimedOut(limit))
    }
}

/// Builder for creating a scheduler.
pub struct SchedulerBuilder {
    job: Option<Arc<dyn ScheduledJob>>,
    schedule: Option<Schedule>,
    config: SchedulerConfig,
    metrics: Option<Arc<SweepMetrics>>,
}

impl SchedulerBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            job: None,
            schedule: None,
            config: SchedulerConfig::default(),
            metrics: None,
        }
    }

    /// Set the job to invoke.
    #[must_use]
    pub fn job(mut self, job: Arc<dyn ScheduledJob>) -> Self {
        self.job = Some(job);
        self
    }

    /// Set the schedule.
    #[must_use]
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the metrics used to count timed-out invocations.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<SweepMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the scheduler, returning it with its shutdown sender.
    pub fn build(self) -> Result<(Scheduler, mpsc::Sender<()>), JobError> {
        let job = self
            .job
            .ok_or_else(|| JobError::Configuration("job is required".into()))?;
        let schedule = self
            .schedule
            .ok_or_else(|| JobError::Configuration("schedule is required".into()))?;
        if self.config.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(JobError::Configuration("job timeout must be non-zero".into()));
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let scheduler = Scheduler {
            job,
            schedule,
            config: self.config,
            metrics: self.metrics.unwrap_or_default(),
            shutdown_rx,
            consecutive_failures: 0,
        };

        Ok((scheduler, shutdown_tx))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
