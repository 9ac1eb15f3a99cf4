//! Error types for the learner.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing JSON documents.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File could not be written
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document content is not valid JSON of the expected shape
    #[error("Malformed document {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a learn submission is rejected before it is queued.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The hint matched no device and zero or several profiles
    #[error("Destination for '{hint}' is ambiguous ({candidates} candidates)")]
    AmbiguousDestination { hint: String, candidates: usize },

    /// The chosen destination vanished before the placeholder was written
    #[error("Destination {0} no longer exists")]
    DestinationGone(String),

    /// Destination stores could not be read or written
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("fallback threshold ({fallback_at}s) must be below the timeout ({timeout}s)")]
    FallbackAfterTimeout { fallback_at: u64, timeout: u64 },
}
