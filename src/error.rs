//! Error types for the unlock engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    #[error("Invalid ordering: {0}")]
    InvalidOrdering(String),

    #[error("Requirements not met: {0}")]
    RequirementsNotMet(String),

    #[error("Attempt limit exceeded: quiz {quiz_id} allows {max_attempts} attempts")]
    AttemptLimitExceeded { quiz_id: String, max_attempts: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
