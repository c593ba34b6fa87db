//! Error taxonomy for library-internal failures
//!
//! Every variant here is recovered inside the crate and logged. The user's own
//! errors and panics never travel through this type.

use thiserror::Error;

/// Errors raised by configuration, storage and rendering internals
#[derive(Error, Debug)]
pub enum CronistaError {
    #[error("Configuration issue: {0}")]
    Configuration(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Tracking limit exceeded: {what} is at capacity ({capacity})")]
    TrackingLimitExceeded { what: &'static str, capacity: usize },

    #[error("Value could not be rendered: {0}")]
    Rendering(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for cronista internals
pub type Result<T> = std::result::Result<T, CronistaError>;
