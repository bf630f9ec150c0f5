use thiserror::Error;

/// Errors raised while constructing core domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The inactivity threshold must be a positive duration.
    #[error("invalid inactivity threshold: {0}")]
    InvalidThreshold(String),

    /// A status string could not be interpreted.
    #[error("invalid account status: {0:?}")]
    InvalidStatus(String),
}
