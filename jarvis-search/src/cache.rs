//! In-memory cache for search responses.
//!
//! Keyed by (endpoint, lowercased query, depth, result count). Uses
//! [`moka`] for async-friendly caching with TTL and automatic eviction.

use std::sync::OnceLock;
use std::time::Duration;

use moka::future::Cache;

use crate::types::{SearchOptions, SearchResponse};

/// Maximum number of cached responses.
const MAX_CACHE_ENTRIES: u64 = 100;

/// Global process-wide search cache.
///
/// Lazily initialised on first access. TTL is set when first created
/// and cannot be changed after initialisation.
static CACHE: OnceLock<Cache<CacheKey, SearchResponse>> = OnceLock::new();

/// Composite cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    endpoint: String,
    /// Lowercased, whitespace-collapsed query.
    query: String,
    depth: &'static str,
    max_results: usize,
    include_answer: bool,
}

impl CacheKey {
    /// Build a deterministic cache key.
    ///
    /// Queries differing only in case or surrounding/repeated whitespace
    /// share a key.
    pub fn new(endpoint: &str, query: &str, options: &SearchOptions) -> Self {
        let query = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Self {
            endpoint: endpoint.to_owned(),
            query,
            depth: options.depth.as_str(),
            max_results: options.max_results,
            include_answer: options.include_answer,
        }
    }
}

fn get_or_init_cache(ttl_seconds: u64) -> &'static Cache<CacheKey, SearchResponse> {
    CACHE.get_or_init(|| {
        Cache::builder()
            .max_capacity(MAX_CACHE_ENTRIES)
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build()
    })
}

/// Look up a cached response. The TTL only applies on first use.
pub async fn get(key: &CacheKey, ttl_seconds: u64) -> Option<SearchResponse> {
    get_or_init_cache(ttl_seconds).get(key).await
}

/// Insert a response into the cache.
pub async fn insert(key: CacheKey, response: SearchResponse, ttl_seconds: u64) {
    get_or_init_cache(ttl_seconds).insert(key, response).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SearchDepth, SearchHit};

    const ENDPOINT: &str = "https://api.example.com/search";

    #[test]
    fn cache_key_normalises_query() {
        let opts = SearchOptions::default();
        let key1 = CacheKey::new(ENDPOINT, "  Weather   in PARIS ", &opts);
        let key2 = CacheKey::new(ENDPOINT, "weather in paris", &opts);
        assert_eq!(key1, key2);
    }

    #[test]
    fn cache_key_differs_by_options() {
        let key1 = CacheKey::new(ENDPOINT, "rust", &SearchOptions::default());
        let key2 = CacheKey::new(
            ENDPOINT,
            "rust",
            &SearchOptions {
                depth: SearchDepth::Basic,
                ..SearchOptions::default()
            },
        );
        let key3 = CacheKey::new(
            ENDPOINT,
            "rust",
            &SearchOptions {
                max_results: 3,
                ..SearchOptions::default()
            },
        );
        assert_ne!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn cache_key_differs_by_endpoint() {
        let opts = SearchOptions::default();
        let key1 = CacheKey::new("http://a/search", "rust", &opts);
        let key2 = CacheKey::new("http://b/search", "rust", &opts);
        assert_ne!(key1, key2);
    }

    #[tokio::test]
    async fn cache_miss_returns_none() {
        let key = CacheKey::new(ENDPOINT, "cache_test_miss_xyz", &SearchOptions::default());
        assert!(get(&key, 600).await.is_none());
    }

    #[tokio::test]
    async fn cache_insert_and_retrieve() {
        let key = CacheKey::new(ENDPOINT, "cache_test_insert", &SearchOptions::default());
        let response = SearchResponse {
            answer: Some("cached answer".into()),
            results: vec![SearchHit {
                title: Some("Cached".into()),
                url: "https://cached.com".into(),
                content: "A cached result".into(),
                score: 0.9,
            }],
        };

        insert(key.clone(), response, 600).await;

        let cached = get(&key, 600).await;
        let cached = match cached {
            Some(c) => c,
            None => unreachable!("should be cached"),
        };
        assert_eq!(cached.answer.as_deref(), Some("cached answer"));
        assert_eq!(cached.results.len(), 1);
    }
}
