use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::CoreError;

const SECONDS_PER_DAY: u64 = 86_400;

/// How long an account may go without activity before it becomes a
/// suspension candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InactivityThreshold {
    duration: chrono::Duration,
}

impl InactivityThreshold {
    /// Build a threshold from a positive duration.
    pub fn new(duration: Duration) -> Result<Self, CoreError> {
        if duration.is_zero() {
            return Err(CoreError::InvalidThreshold("must be greater than zero".into()));
        }
        let duration = chrono::Duration::from_std(duration)
            .map_err(|e| CoreError::InvalidThreshold(e.to_string()))?;
        Ok(Self { duration })
    }

    pub fn from_secs(secs: u64) -> Result<Self, CoreError> {
        Self::new(Duration::from_secs(secs))
    }

    pub fn from_days(days: u64) -> Result<Self, CoreError> {
        let secs = days
            .checked_mul(SECONDS_PER_DAY)
            .ok_or_else(|| CoreError::InvalidThreshold(format!("{days} days overflows")))?;
        Self::from_secs(secs)
    }

    /// The threshold as a standard library duration.
    #[must_use]
    pub fn as_std(&self) -> Duration {
        // Positive by construction.
        self.duration.to_std().unwrap_or_default()
    }

    /// The last activity instant that still counts as inactive at `now`.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
