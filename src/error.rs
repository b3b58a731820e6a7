//! Error types for MCP Auth Guard
//!
//! Messages never carry secret values or raw credentials; secret names,
//! client ids and token hashes are the only identifiers that appear here.

use std::io;

use thiserror::Error;

/// Result type alias for MCP Auth Guard
pub type Result<T> = std::result::Result<T, Error>;

/// MCP Auth Guard errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secret does not exist in the configured backend
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Secret backend failed to return a value
    #[error("Failed to retrieve secret '{name}': {reason}")]
    SecretRetrieval {
        /// Secret name
        name: String,
        /// Failure reason (never contains secret material)
        reason: String,
    },

    /// Storage backend unavailable
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Storage backend did not answer in time
    #[error("Backend timeout: {0}")]
    BackendTimeout(String),

    /// Identity provider could not supply an access token
    #[error("Credential error: {0}")]
    Credential(String),

    /// Document store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error is transient (a retry by the caller may succeed).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BackendUnavailable(_)
            | Self::BackendTimeout(_)
            | Self::Http(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::SecretRetrieval { .. }
            | Self::Credential(_) => true,
            Self::Config(_)
            | Self::SecretNotFound(_)
            | Self::Storage(_)
            | Self::Json(_)
            | Self::Internal(_) => false,
        }
    }
}
