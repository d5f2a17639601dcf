//! Common error types for Inflight
//!
//! This module defines all error types used across the Inflight runtime.
//! Errors local to a single request are delivered to that request's sink as
//! a terminal event and never cross the engine callback boundary.

use thiserror::Error;

/// Main error type for Inflight
#[derive(Error, Debug)]
pub enum InflightError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Submission reused an id that is still active
    #[error("Duplicate request id: {0}")]
    DuplicateId(String),

    /// Dispatch or abort referenced a non-existent or already-terminal id
    #[error("Unknown request id: {0}")]
    UnknownId(String),

    /// External engine not loaded or not reachable
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Engine callback payload could not be parsed to recover a request id
    #[error("Malformed engine payload: {0}")]
    MalformedPayload(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Too many requests in flight (backpressure)
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// Requested model not present in the catalog
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Model asset download errors
    #[error("Download error: {0}")]
    Download(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InflightError {
    /// True for errors that represent benign timing races rather than bugs
    ///
    /// A late dispatch after abort or completion lands here; callers log it
    /// as a diagnostic and drop the chunk instead of failing the request.
    pub fn is_benign(&self) -> bool {
        matches!(self, InflightError::UnknownId(_))
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        InflightError::Config(msg.into())
    }

    /// Create a duplicate id error
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        InflightError::DuplicateId(id.into())
    }

    /// Create an unknown id error
    pub fn unknown_id(id: impl Into<String>) -> Self {
        InflightError::UnknownId(id.into())
    }

    /// Create an engine unavailable error
    pub fn engine_unavailable(msg: impl Into<String>) -> Self {
        InflightError::EngineUnavailable(msg.into())
    }

    /// Create a malformed payload error
    pub fn malformed_payload(msg: impl Into<String>) -> Self {
        InflightError::MalformedPayload(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        InflightError::InvalidInput(msg.into())
    }

    /// Create an overloaded error
    pub fn overloaded(msg: impl Into<String>) -> Self {
        InflightError::Overloaded(msg.into())
    }

    /// Create a model not found error
    pub fn model_not_found(id: impl Into<String>) -> Self {
        InflightError::ModelNotFound(id.into())
    }

    /// Create a download error
    pub fn download(msg: impl Into<String>) -> Self {
        InflightError::Download(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        InflightError::Internal(msg.into())
    }
}

/// Result type alias for Inflight operations
pub type Result<T> = std::result::Result<T, InflightError>;
