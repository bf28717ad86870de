// src/error.rs

//! Unified error handling for the acquisition engine.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
///
/// Per-ID fetch problems never surface as `AppError`; they are folded into an
/// [`Outcome`](crate::models::Outcome) and written to the ledger. What remains
/// here is either a setup error or one of the fatal conditions that abort a run.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Filesystem layout problem tied to a specific path
    #[error("Storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    /// A ledger lock was poisoned by a panicking writer
    #[error("Ledger lock poisoned for {0}; refusing to continue")]
    LedgerPoisoned(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a storage error for a path.
    pub fn storage(path: impl AsRef<Path>, message: impl fmt::Display) -> Self {
        Self::Storage {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
