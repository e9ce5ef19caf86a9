//! Search client configuration.
//!
//! [`SearchConfig`] holds the connection settings for the search API. The
//! per-query knobs live in [`crate::SearchOptions`].

use crate::error::SearchError;

/// Default search API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

/// Connection settings for the search API.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Base URL of the search API; `/search` is appended.
    pub base_url: String,
    /// HTTP request timeout in seconds.
    pub timeout_seconds: u64,
    /// How long to cache responses in seconds. Set to 0 to disable caching.
    pub cache_ttl_seconds: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout_seconds: 20,
            cache_ttl_seconds: 300,
        }
    }
}

impl SearchConfig {
    /// Creates a config for the default endpoint with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Overrides the base URL (used for self-hosted proxies and tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `api_key` must not be blank
    /// - `timeout_seconds` must be greater than 0
    /// - `base_url` must be an absolute http(s) URL
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.api_key.trim().is_empty() {
            return Err(SearchError::Config("api_key must not be empty".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(SearchError::Config(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        self.endpoint().map(|_| ())
    }

    /// Full URL of the search endpoint.
    pub fn endpoint(&self) -> Result<url::Url, SearchError> {
        let base = url::Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|e| SearchError::Config(format!("invalid base_url: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SearchError::Config(format!(
                "base_url must use http or https, got `{}`",
                base.scheme()
            )));
        }
        let path = format!("{}/search", base.path().trim_end_matches('/'));
        let mut endpoint = base;
        endpoint.set_path(&path);
        Ok(endpoint)
    }
}
