use serde::Deserialize;

use lapse_core::{AccountRole, InactivityThreshold};
use lapse_worker::DEFAULT_PAGE_SIZE;

use crate::error::DaemonError;

/// Configuration for the suspension sweep.
///
/// ```toml
/// [job]
/// inactivity_threshold_seconds = 2592000  # 30 days
/// role = "provider"
/// page_size = 1000
/// ```
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    /// Accounts idle at least this long are suspended. Required.
    pub inactivity_threshold_seconds: Option<u64>,
    /// Account role eligible for suspension.
    #[serde(default = "default_role")]
    pub role: String,
    /// Accounts fetched per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Capacity of the suspension event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_seconds: None,
            role: default_role(),
            page_size: default_page_size(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl JobConfig {
    /// Resolve the configured threshold.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Config`] if the threshold is unset or zero.
    pub fn threshold(&self) -> Result<InactivityThreshold, DaemonError> {
        let secs = self.inactivity_threshold_seconds.ok_or_else(|| {
            DaemonError::Config("[job] inactivity_threshold_seconds must be set".into())
        })?;
        InactivityThreshold::from_secs(secs)
            .map_err(|e| DaemonError::Config(format!("[job] inactivity_threshold_seconds: {e}")))
    }

    /// The role as a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Config`] if the role is blank.
    pub fn role(&self) -> Result<AccountRole, DaemonError> {
        let role = self.role.trim();
        if role.is_empty() {
            return Err(DaemonError::Config("[job] role must not be empty".into()));
        }
        Ok(AccountRole::new(role))
    }
}

fn default_role() -> String {
    AccountRole::provider().to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_event_buffer() -> usize {
    1024
}
