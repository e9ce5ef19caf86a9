//! Error types for the jarvis-search crate.
//!
//! Messages are stable and safe to log. The API key never appears in an
//! error message.

/// Errors that can occur while talking to the search API.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The HTTP request could not be sent or the connection failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The search API answered with a non-success status.
    #[error("search API returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// The request exceeded the configured timeout.
    #[error("search timed out: {0}")]
    Timeout(String),

    /// The response body was not the expected JSON shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid search configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl SearchError {
    /// Returns `true` for failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) | Self::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Convenience type alias for jarvis-search results.
pub type Result<T> = std::result::Result<T, SearchError>;
