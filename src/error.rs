use thiserror::Error;

/// Errors that can occur in the tracker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Covariance matrix is not positive definite")]
    SingularCovariance,
}

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
