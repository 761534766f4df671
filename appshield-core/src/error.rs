//! Error types for the durable store and the configuration loader

use std::path::PathBuf;
use thiserror::Error;

/// Durable key/value store errors
///
/// These never leave the policy store: every read that hits one of these
/// falls back to the safe defaults, every failed write is logged.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read the backing file
    #[error("Failed to read policy store from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the backing file
    #[error("Failed to write policy store to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file exists but does not parse
    #[error("Policy store at {path} is corrupted or has an invalid format")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A key holds a value of a different type than requested
    #[error("Key '{key}' holds a {found}, expected a {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Backend-specific failure (used by in-memory and test stores)
    #[error("Policy store unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read shield config from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse shield config at {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("Invalid shield config: {0}")]
    Invalid(String),
}
