//! Shared HTTP client for search API requests.

use crate::config::SearchConfig;
use crate::error::SearchError;
use std::time::Duration;

const USER_AGENT: &str = concat!("jarvis-search/", env!("CARGO_PKG_VERSION"));

/// Build a [`reqwest::Client`] configured for the search API.
///
/// # Errors
///
/// Returns [`SearchError::Http`] if the client cannot be constructed.
pub fn build_client(config: &SearchConfig) -> Result<reqwest::Client, SearchError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SearchError::Http(format!("failed to build HTTP client: {e}")))
}
