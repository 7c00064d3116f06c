use thiserror::Error;

/// Errors surfaced by the engine request layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error from the underlying ingestion or iteration core
    #[error("log core error: {0}")]
    Core(#[from] logmerge::Error),

    /// A request needs an opened log manager
    #[error("log manager is not initialized")]
    NoManager,

    /// A request needs a created session
    #[error("session is not initialized")]
    NoSession,

    /// Malformed request parameters
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The worker thread is gone; no further requests can be queued
    #[error("engine worker is not running")]
    WorkerGone,

    /// The request was cancelled before completion
    #[error("request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
