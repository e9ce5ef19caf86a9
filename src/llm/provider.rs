//! Upstream chat-provider seam.
//!
//! A [`ChatProvider`] is one credential on one OpenAI-compatible endpoint.
//! Failures come back as [`UpstreamError`], already classified at the HTTP
//! boundary so callers never inspect message text to decide on fallback.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use super::message::Message;

/// Legacy markers for rate limiting when no status code is available.
const RATE_LIMIT_MARKERS: &[&str] = &["429", "rate limit", "tokens per day"];

/// Classification of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// The account hit a request or token quota.
    RateLimited,
    /// Anything else: network, auth, server error, malformed response.
    Other,
}

/// A failed upstream call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
    /// HTTP status when the failure was an HTTP response.
    pub status: Option<u16>,
}

impl UpstreamError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::RateLimited,
            message: message.into(),
            status: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Other,
            message: message.into(),
            status: None,
        }
    }

    /// Classify an HTTP error response.
    ///
    /// 429 is always a rate limit. Other statuses fall back to the text
    /// markers, since some gateways report quota exhaustion as 400 or 413.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if status == 429 {
            UpstreamErrorKind::RateLimited
        } else {
            classify_text(&message)
        };
        Self {
            kind,
            message: format!("HTTP {status}: {message}"),
            status: Some(status),
        }
    }

    /// Classify a failure that only has text (transport or stream errors).
    pub fn from_text(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify_text(&message),
            message,
            status: None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == UpstreamErrorKind::RateLimited
    }
}

fn classify_text(message: &str) -> UpstreamErrorKind {
    let lower = message.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        UpstreamErrorKind::RateLimited
    } else {
        UpstreamErrorKind::Other
    }
}

/// A stream of text deltas from one upstream call.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// One upstream credential on a chat-completion endpoint.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Log-safe label for this provider (never the raw secret).
    fn label(&self) -> String;

    /// Request a whole response.
    async fn complete(&self, messages: &[Message]) -> Result<String, UpstreamError>;

    /// Request an incremental response.
    ///
    /// Errors before the first byte are returned directly; errors while
    /// reading appear as `Err` items in the stream.
    async fn stream(&self, messages: &[Message]) -> Result<DeltaStream, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limited() {
        let err = UpstreamError::from_status(429, "slow down");
        assert!(err.is_rate_limited());
        assert_eq!(err.status, Some(429));
        assert_eq!(err.message, "HTTP 429: slow down");
    }

    #[test]
    fn quota_text_on_other_status_is_rate_limited() {
        let err = UpstreamError::from_status(413, "Limit 100000 tokens per day exceeded");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn server_error_is_other() {
        let err = UpstreamError::from_status(503, "overloaded");
        assert_eq!(err.kind, UpstreamErrorKind::Other);
    }

    #[test]
    fn text_markers_case_insensitive() {
        assert!(UpstreamError::from_text("Rate Limit reached for model").is_rate_limited());
        assert!(!UpstreamError::from_text("connection reset").is_rate_limited());
    }
}
