//! Error types for the tracking loop.
//!
//! Nothing here is fatal to the frame loop: callers log these and keep going.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("actuator link is not connected")]
    ActuatorUnavailable,

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("activity log write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
