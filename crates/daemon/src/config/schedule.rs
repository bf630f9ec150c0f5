use std::time::Duration;

use serde::Deserialize;

use lapse_worker::{Schedule, SchedulerConfig};

use crate::error::DaemonError;

/// When the sweep runs.
///
/// A `cron` expression takes precedence over `interval_seconds`.
#[derive(Debug, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Cron expression, evaluated in `timezone`.
    pub cron: Option<String>,
    /// IANA timezone for `cron`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Run one sweep immediately at startup.
    #[serde(default)]
    pub run_on_start: bool,
    /// Cancel a sweep that runs longer than this.
    pub timeout_seconds: Option<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            cron: None,
            timezone: default_timezone(),
            run_on_start: false,
            timeout_seconds: None,
        }
    }
}

impl ScheduleConfig {
    /// Build the worker schedule.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Job`] for a zero interval, a bad cron
    /// expression, or an unknown timezone.
    pub fn schedule(&self) -> Result<Schedule, DaemonError> {
        let schedule = match self.cron.as_deref() {
            Some(expr) => Schedule::cron(expr, &self.timezone)?,
            None => Schedule::interval(Duration::from_secs(self.interval_seconds))?,
        };
        Ok(schedule)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            run_on_start: self.run_on_start,
            job_timeout: self.timeout(),
        }
    }
}

fn default_interval() -> u64 {
    86_400
}

fn default_timezone() -> String {
    "UTC".to_owned()
}
