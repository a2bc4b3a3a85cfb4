//! Common error types for genarc

use thiserror::Error;

/// Common result type for genarc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from configuration and the JSON-backed stores
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config file could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
