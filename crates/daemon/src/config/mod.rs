mod job;
mod schedule;
mod store;
mod telemetry;


pub use job::*;
pub use schedule::*;
pub use store::*;
pub use telemetry::*;

use std::path::Path;

use serde::Deserialize;

use crate::error::DaemonError;

/// Top-level daemon configuration, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct LapseConfig {
    /// Account repository backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Sweep parameters.
    #[serde(default)]
    pub job: JobConfig,
    /// When the sweep runs.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// `OpenTelemetry` trace export.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl LapseConfig {
    /// Load configuration from `path`, or defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Io`] if the file cannot be read and
    /// [`DaemonError::Toml`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        if !path.exists() {
            return Ok(toml::from_str("")?);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
