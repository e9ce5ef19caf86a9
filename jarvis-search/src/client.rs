//! Search API client.

use serde::Deserialize;
use serde_json::json;

use crate::cache::{self, CacheKey};
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::http::build_client;
use crate::types::{SearchHit, SearchOptions, SearchResponse};

/// Client for an answer-synthesizing web search API.
#[derive(Debug, Clone)]
pub struct SearchClient {
    config: SearchConfig,
    endpoint: url::Url,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl From<RawResponse> for SearchResponse {
    fn from(raw: RawResponse) -> Self {
        Self {
            answer: raw.answer.filter(|a| !a.trim().is_empty()),
            results: raw
                .results
                .into_iter()
                .map(|hit| SearchHit {
                    title: hit.title,
                    url: hit.url.unwrap_or_default(),
                    content: hit.content.unwrap_or_default(),
                    score: hit.score.unwrap_or(0.0),
                })
                .collect(),
        }
    }
}

impl SearchClient {
    /// Create a client after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] for an invalid configuration or
    /// [`SearchError::Http`] if the HTTP client cannot be built.
    pub fn new(config: SearchConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let http = build_client(&config)?;
        Ok(Self {
            config,
            endpoint,
            http,
        })
    }

    /// The resolved search endpoint.
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Run a search query.
    ///
    /// At most `options.max_results` sources are returned. Responses are
    /// cached for `cache_ttl_seconds` when that is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Status`] for non-success responses,
    /// [`SearchError::Parse`] for malformed bodies, and
    /// [`SearchError::Http`] / [`SearchError::Timeout`] for transport failures.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let ttl = self.config.cache_ttl_seconds;
        let key = CacheKey::new(self.endpoint.as_str(), query, options);
        if ttl > 0
            && let Some(hit) = cache::get(&key, ttl).await
        {
            tracing::debug!(query, "search cache hit");
            return Ok(hit);
        }

        let body = json!({
            "query": query,
            "search_depth": options.depth.as_str(),
            "max_results": options.max_results,
            "include_answer": options.include_answer,
            "include_raw_content": false,
        });

        tracing::debug!(query, depth = %options.depth, "sending search request");
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                message: extract_error_message(&text),
            });
        }

        let text = response.text().await?;
        let raw: RawResponse = serde_json::from_str(&text)
            .map_err(|e| SearchError::Parse(format!("invalid search response: {e}")))?;
        let mut parsed = SearchResponse::from(raw);
        parsed.results.truncate(options.max_results);

        if ttl > 0 {
            cache::insert(key, parsed.clone(), ttl).await;
        }
        Ok(parsed)
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"detail": {"error": ".."}}`, `{"detail": ".."}` and
/// `{"error": ".."}`; otherwise returns the trimmed body.
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/detail/error"),
            value.get("detail"),
            value.get("error"),
            value.pointer("/error/message"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(s) = candidate.as_str() {
                return s.to_owned();
            }
        }
    }
    body.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_response_defaults_missing_fields() {
        let raw: RawResponse = match serde_json::from_str(r#"{"results":[{"url":"https://a.com"}]}"#) {
            Ok(r) => r,
            Err(_) => unreachable!("valid json"),
        };
        let parsed = SearchResponse::from(raw);
        assert!(parsed.answer.is_none());
        assert_eq!(parsed.results.len(), 1);
        assert!(parsed.results[0].title.is_none());
        assert_eq!(parsed.results[0].content, "");
        assert_eq!(parsed.results[0].score, 0.0);
    }

    #[test]
    fn blank_answer_becomes_none() {
        let raw = RawResponse {
            answer: Some("  ".into()),
            results: Vec::new(),
        };
        assert!(SearchResponse::from(raw).answer.is_none());
    }

    #[test]
    fn extract_error_message_shapes() {
        assert_eq!(
            extract_error_message(r#"{"detail":{"error":"Unauthorized: missing or invalid API key."}}"#),
            "Unauthorized: missing or invalid API key."
        );
        assert_eq!(extract_error_message(r#"{"detail":"bad query"}"#), "bad query");
        assert_eq!(extract_error_message(r#"{"error":"quota"}"#), "quota");
        assert_eq!(extract_error_message(" plain text "), "plain text");
    }

    #[test]
    fn new_rejects_invalid_config() {
        assert!(SearchClient::new(SearchConfig::new("")).is_err());
    }
}
