use thiserror::Error;

/// Track estimator error types
#[derive(Error, Debug)]
pub enum SlamError {
    #[error("Invalid pose: {0}")]
    InvalidPose(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Worker stopped")]
    WorkerStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for estimator operations
pub type SlamResult<T> = Result<T, SlamError>;
