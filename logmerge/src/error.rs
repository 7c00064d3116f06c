use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while ingesting or iterating log files.
#[derive(Debug, Error)]
pub enum Error {
    /// A source could not be opened or is not randomly seekable
    #[error("cannot open log source {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Bytes could not be decoded in the chosen encoding
    #[error("cannot decode {len} byte(s) at offset {offset} as {encoding}")]
    Encoding {
        encoding: &'static str,
        offset: u64,
        len: usize,
    },

    /// A line failed the format's shape test; recoverable, the line is
    /// treated as a continuation of the preceding entry
    #[error("line does not match the format shape: {0}")]
    LineShape(String),

    /// A time field was present but unparseable
    #[error("cannot parse time {value:?} with mask {mask:?}")]
    TimeParse { value: String, mask: String },

    /// No file admitted any format; fatal for the ingest call
    #[error("no suitable log files found in {source_name}")]
    Ingestion { source_name: String },

    /// Unrecoverable I/O during iteration; the current iterator is aborted
    #[error("iteration failed on {filename}: {source}")]
    Iterator {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// Explicit cancellation of a long-running operation
    #[error("operation cancelled")]
    Cancelled,

    /// A format document is missing required keys or carries invalid values
    #[error("invalid format document {path}: {reason}")]
    Catalog { path: PathBuf, reason: String },

    /// Error while reading an archive
    #[error("archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    /// I/O error outside of iteration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid regular expression in a format definition
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

/// A specialized Result type for log ingestion and iteration.
pub type Result<T> = std::result::Result<T, Error>;
