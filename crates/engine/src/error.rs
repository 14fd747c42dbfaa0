use thiserror::Error;

/// Failures surfaced by the connection and query layers.
///
/// Fetch failures are normally captured in entry state; these values only
/// appear where a caller explicitly asks for an outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// No backend handle is available.
    #[error("backend connection unavailable: {reason}")]
    ConnectionUnavailable { reason: String },

    /// The remote call failed.
    #[error("fetch failed: {0}")]
    FetchFailure(String),

    /// The cache or connection this observer was bound to is gone.
    #[error("observer detached")]
    Detached,
}
