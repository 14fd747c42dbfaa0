use thiserror::Error;

/// Errors raised while resolving or calling the backend.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The configured base URL is malformed or not allowed.
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),

    /// The HTTP client could not be constructed.
    #[error("build http client: {0}")]
    Client(#[source] reqwest::Error),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The backend answered with an unexpected body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
