//! Request options and result types for web search.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How much work the search API should spend on a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    /// Fast, shallow search.
    Basic,
    /// Slower search that reads more of each source.
    #[default]
    Advanced,
}

impl SearchDepth {
    /// Wire name of this depth.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }
}

impl fmt::Display for SearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-query options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub depth: SearchDepth,
    pub max_results: usize,
    /// Ask the API for a synthesized answer alongside the sources.
    pub include_answer: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            depth: SearchDepth::Advanced,
            max_results: 7,
            include_answer: true,
        }
    }
}

/// A single source returned by the search API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Page title, if the API returned one.
    pub title: Option<String>,
    /// Source URL. Empty when the API omitted it.
    pub url: String,
    /// Extracted text snippet.
    pub content: String,
    /// Relevance score in `0.0..=1.0` (higher is better).
    pub score: f64,
}

/// The full answer to a search query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Answer synthesized by the search API from its sources.
    pub answer: Option<String>,
    /// Ranked sources, best first.
    pub results: Vec<SearchHit>,
}

impl SearchResponse {
    /// Returns `true` when the API found no sources.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
