use thiserror::Error;

/// Errors that stop the daemon from starting or finishing a command.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading the configuration or seed file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The account repository could not be created.
    #[error("store error: {0}")]
    Store(#[from] lapse_store::StoreError),

    /// The sweep or the scheduler failed.
    #[error("job error: {0}")]
    Job(#[from] lapse_worker::JobError),

    /// The configuration file is not valid TOML.
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Report serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
