//! Error types for genarc-ingest
//!
//! Errors are split by the seam that raises them. [`IngestError`] is the
//! creation-boundary error: it aborts one creation and is logged by the queue,
//! never propagated further.

use thiserror::Error;

/// Provider adapter failure
#[derive(Debug, Error)]
pub enum AdapterError {
    /// A field needed to name files (id, image list) is absent or malformed
    #[error("{provider}: missing required field `{field}`")]
    MissingField {
        provider: &'static str,
        field: &'static str,
    },

    /// A field is present but cannot be interpreted
    #[error("{provider}: invalid field `{field}`: {reason}")]
    InvalidField {
        provider: &'static str,
        field: &'static str,
        reason: String,
    },

    /// Secondary network lookup failed
    #[error("Lookup failed: {0}")]
    Fetch(#[from] FetchError),

    /// Model-info cache failure
    #[error("Model info store error: {0}")]
    Store(#[from] genarc_common::Error),
}

impl AdapterError {
    pub fn missing(provider: &'static str, field: &'static str) -> Self {
        Self::MissingField { provider, field }
    }

    pub fn invalid(provider: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            provider,
            field,
            reason: reason.into(),
        }
    }
}

/// HTTP fetch failure
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Connection, TLS, timeout or body decoding failure
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// Writing the response to disk failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata tool or transcoder failure
#[derive(Debug, Error)]
pub enum ToolError {
    /// The external process could not be started
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool reported an error or an unexpected response
    #[error("{tool} failed: {message}")]
    Failed { tool: String, message: String },

    /// Tool output could not be parsed
    #[error("Unreadable output from {tool}: {message}")]
    Output { tool: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure that aborts a single creation
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Download error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Sidecar or directory IO; these abort the creation
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Common error: {0}")]
    Common(#[from] genarc_common::Error),
}

/// Result alias for creation-level operations
pub type Result<T> = std::result::Result<T, IngestError>;
