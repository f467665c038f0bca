//! Error types for indexer operations.
//!
//! This module defines the crate-wide error enumeration using `thiserror`,
//! covering failures in chain RPC communication, database operations,
//! event decoding and configuration.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Errors encountered during database operations.
    ///
    /// Wraps `sqlx::Error` via `#[from]` so storage calls propagate
    /// with the `?` operator.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors talking to the chain RPC node.
    ///
    /// Covers network failures, timeouts and unexpected response shapes.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Errors while decoding contract notifications or invoke results.
    #[error("decode error: {0}")]
    Decode(String),

    /// Errors related to configuration (missing file, invalid values).
    #[error("config error: {0}")]
    Config(String),

    /// File I/O errors (node-identity persistence, config loading).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for operations that don't fit other categories.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Type alias for Results using [`IndexerError`].
pub type Result<T> = std::result::Result<T, IndexerError>;

impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        IndexerError::Rpc(err.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Decode(err.to_string())
    }
}
