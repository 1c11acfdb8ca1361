//! Errors surfaced by cache construction and typed reads.
//!
//! Fetch failures are never returned from cache operations; they are stored
//! against the key and read back with [`Cache::get_error`](crate::Cache::get_error).

use thiserror::Error;

/// Errors produced by the cache itself.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A TTL was zero.
    #[error("{field} must be greater than zero")]
    InvalidTtl { field: &'static str },

    /// The configuration document did not parse.
    #[error("invalid cache configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A cached body did not decode into the requested type.
    #[error("cached body for {key} does not match the requested type: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
