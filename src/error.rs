//! Error types for title-matcher.
//!
//! Only configuration and file I/O can fail. Normalization, scoring, ranking
//! and merging always return a value.

use thiserror::Error;

/// Result type alias for title-matcher operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Reading or writing a catalog, video list or report failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog, video list or config file is not valid JSON for its shape
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configured wrapper pattern or site suffix did not compile
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A wrapper pattern compiled but has no capture group for the core title
    #[error("wrapper pattern '{0}' has no capture group")]
    MissingCapture(String),

    /// Configuration values are out of range or inconsistent
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A report or catalog write would clobber an input or a backup
    #[error("safety check failed: {0}")]
    UnsafeOutput(String),
}
