//! # jarvis-search
//!
//! Web search for the Jarvis assistant.
//!
//! Talks to an answer-synthesizing search API (Tavily-compatible): one
//! request returns ranked sources plus an optional synthesized answer.
//!
//! ## Design
//!
//! - One `POST {base_url}/search` per query, bearer-token auth
//! - In-memory cache with configurable TTL
//! - Missing fields in the response are defaulted rather than rejected
//!
//! ## Security
//!
//! - The API key is never logged or included in error messages
//! - Search queries are logged only at debug level

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod types;

pub use client::SearchClient;
pub use config::SearchConfig;
pub use error::{Result, SearchError};
pub use types::{SearchDepth, SearchHit, SearchOptions, SearchResponse};

/// Run a one-off search with a freshly built client.
///
/// # Errors
///
/// Same as [`SearchClient::new`] and [`SearchClient::search`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> jarvis_search::Result<()> {
/// let config = jarvis_search::SearchConfig::new("tvly-...");
/// let response = jarvis_search::search("rust 2024 edition", &config, &Default::default()).await?;
/// for hit in &response.results {
///     println!("{}: {}", hit.title.as_deref().unwrap_or("No title"), hit.url);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn search(
    query: &str,
    config: &SearchConfig,
    options: &SearchOptions,
) -> Result<SearchResponse> {
    SearchClient::new(config.clone())?.search(query, options).await
}
