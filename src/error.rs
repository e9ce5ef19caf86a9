//! Error types for the assistant backend.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`AssistantError::code()`].
//! The HTTP layer maps errors to status codes by variant, never by message.

use crate::llm::provider::UpstreamError;

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Invalid or missing configuration (e.g. no credentials).
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Malformed session identifier.
    pub const INVALID_SESSION: &str = "INVALID_SESSION";

    /// Request failed validation (message length, missing text, ...).
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

    /// Every configured upstream credential failed.
    pub const ALL_UPSTREAM_FAILED: &str = "ALL_UPSTREAM_FAILED";

    /// A single upstream call failed.
    pub const UPSTREAM_FAILED: &str = "UPSTREAM_FAILED";

    /// A streaming response broke after output was produced.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// Session persistence error.
    pub const SESSION_ERROR: &str = "SESSION_ERROR";

    /// Speech synthesis failed.
    pub const SPEECH_FAILED: &str = "SPEECH_FAILED";

    /// Web search failed.
    pub const SEARCH_FAILED: &str = "SEARCH_FAILED";

    /// Context retrieval failed.
    pub const RETRIEVAL_FAILED: &str = "RETRIEVAL_FAILED";

    /// Filesystem error.
    pub const IO_ERROR: &str = "IO_ERROR";

    /// Unclassified internal error.
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// User-facing message when every upstream credential has failed.
pub const ALL_UPSTREAM_FAILED_MESSAGE: &str = "I'm unable to process your request at the moment. \
All API services are temporarily unavailable. Please try again in a few minutes.";

/// User-facing message when every upstream credential is rate limited.
pub const RATE_LIMIT_MESSAGE: &str = "You've reached your daily API limit for this assistant. \
Your credits will reset in a few hours, or you can upgrade your plan for more. \
Please try again later.";

/// Errors produced by the assistant backend.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Malformed session identifier.
    #[error("[{}] {}", error_codes::INVALID_SESSION, .0)]
    InvalidSession(String),

    /// Request failed validation.
    #[error("[{}] {}", error_codes::INVALID_REQUEST, .0)]
    InvalidRequest(String),

    /// Every configured credential failed.
    ///
    /// `rate_limited` is set when every attempt was rejected for rate limiting.
    /// The last upstream failure is kept for diagnostics only.
    #[error("[{}] {}", error_codes::ALL_UPSTREAM_FAILED, exhausted_message(.rate_limited))]
    AllUpstreamFailed {
        rate_limited: bool,
        #[source]
        source: Option<UpstreamError>,
    },

    /// A single upstream call failed.
    #[error("[{}] {}", error_codes::UPSTREAM_FAILED, .0)]
    Upstream(#[from] UpstreamError),

    /// A streaming response failed after output was produced.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    Stream(String),

    /// Session persistence error.
    #[error("[{}] {}", error_codes::SESSION_ERROR, .0)]
    Session(String),

    /// Speech synthesis failed.
    #[error("[{}] {}", error_codes::SPEECH_FAILED, .0)]
    Speech(String),

    /// Web search failed.
    #[error("[{}] {}", error_codes::SEARCH_FAILED, .0)]
    Search(String),

    /// Context retrieval failed.
    #[error("[{}] {}", error_codes::RETRIEVAL_FAILED, .0)]
    Retrieval(String),

    /// Filesystem error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),

    /// Unclassified internal error.
    #[error("[{}] {}", error_codes::INTERNAL_ERROR, .0)]
    Internal(String),
}

impl AssistantError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::InvalidSession(_) => error_codes::INVALID_SESSION,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::AllUpstreamFailed { .. } => error_codes::ALL_UPSTREAM_FAILED,
            Self::Upstream(_) => error_codes::UPSTREAM_FAILED,
            Self::Stream(_) => error_codes::STREAM_FAILED,
            Self::Session(_) => error_codes::SESSION_ERROR,
            Self::Speech(_) => error_codes::SPEECH_FAILED,
            Self::Search(_) => error_codes::SEARCH_FAILED,
            Self::Retrieval(_) => error_codes::RETRIEVAL_FAILED,
            Self::Io(_) => error_codes::IO_ERROR,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Returns the message without the code prefix.
    ///
    /// For [`AssistantError::AllUpstreamFailed`] this is the fixed
    /// user-facing message, never the underlying provider error.
    pub fn message(&self) -> String {
        match self {
            Self::AllUpstreamFailed { rate_limited, .. } => {
                exhausted_message(rate_limited).to_owned()
            }
            Self::Upstream(e) => e.message.clone(),
            Self::Io(e) => e.to_string(),
            Self::Config(m)
            | Self::InvalidSession(m)
            | Self::InvalidRequest(m)
            | Self::Stream(m)
            | Self::Session(m)
            | Self::Speech(m)
            | Self::Search(m)
            | Self::Retrieval(m)
            | Self::Internal(m) => m.clone(),
        }
    }

    /// True when this error means every credential hit its rate limit.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::AllUpstreamFailed { rate_limited, .. } => *rate_limited,
            Self::Upstream(e) => e.is_rate_limited(),
            _ => false,
        }
    }

    /// True for errors caused by the caller's input rather than a fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidSession(_) | Self::InvalidRequest(_))
    }
}

fn exhausted_message(rate_limited: &bool) -> &'static str {
    if *rate_limited {
        RATE_LIMIT_MESSAGE
    } else {
        ALL_UPSTREAM_FAILED_MESSAGE
    }
}

/// Convenience alias for assistant results.
pub type Result<T> = std::result::Result<T, AssistantError>;
