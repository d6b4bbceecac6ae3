//! Error types for the stat engine.
//!
//! Core modules return [`StatResult`]. The Discord layer wraps these in
//! `anyhow` and turns them into operator-facing replies.

/// Stat engine errors
#[derive(Debug, thiserror::Error)]
pub enum StatError {
    /// Referenced metric, column, role or guild row is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Guild already tracks the maximum number of metrics
    #[error("server already tracking maximum number of stats ({max})")]
    MaxMetricsExceeded { max: usize },

    /// Operator input failed a numeric or range check
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A workflow prompt was not answered in time
    #[error("Timed out waiting for input")]
    TimeoutExpired,

    /// A chat platform request made on behalf of the engine failed
    #[error("Platform request failed: {0}")]
    Platform(String),

    /// SQL error from sqlite
    #[error("Persistence failure: {0}")]
    Persistence(#[from] sqlite::Error),

    /// Stored stat mapping could not be parsed or written
    #[error("Corrupt stat mapping: {0}")]
    CorruptMapping(#[from] serde_json::Error),
}

/// Result type alias for stat engine operations
pub type StatResult<T> = Result<T, StatError>;
