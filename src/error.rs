//! Error types
//!
//! One enum per failure domain. Run-level failures never escape the
//! runner as errors; they are folded into a `RunOutcome`.

use thiserror::Error;

/// Language-model gateway failures
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway unavailable at {0}")]
    Unavailable(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Gateway returned an empty response")]
    EmptyResponse,
}

/// Persistence failures in the output writer
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration store failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid time of day '{0}' (expected HH:MM)")]
    InvalidTimeOfDay(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type for output writes
pub type OutputResult<T> = Result<T, OutputError>;
