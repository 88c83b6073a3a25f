//! Error types for ReportHarvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ReportHarvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Missing or invalid configuration, catalog or credential. Fatal for a stage.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP failure or non-success status from an external API.
    #[error("request failed: {context}{}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Request {
        context: String,
        status: Option<u16>,
    },

    /// A record whose link, file id or table could not be resolved.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// JSON/TOML/CSV/archive decoding error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a request error without an HTTP status (transport failure, timeout).
    pub fn request(context: impl Into<String>) -> Self {
        Self::Request {
            context: context.into(),
            status: None,
        }
    }

    /// Create a request error for a non-success HTTP status.
    pub fn status(context: impl Into<String>, status: u16) -> Self {
        Self::Request {
            context: context.into(),
            status: Some(status),
        }
    }

    /// Create a permanent extraction failure.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
