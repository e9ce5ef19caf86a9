//! Web search augmentation for realtime chat.
//!
//! [`SearchAugmentor`] turns a question into a focused search query with a
//! fast auxiliary model call, runs the search and formats the results for
//! both the system prompt and the client event stream. Every failure
//! degrades: a bad extraction falls back to the raw question and a failed
//! search yields no results.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use jarvis_search::{SearchClient, SearchOptions, SearchResponse};

use crate::llm::message::Message;
use crate::llm::provider::ChatProvider;
use crate::retry::RetryPolicy;
use crate::session::HistoryPair;

const QUERY_EXTRACTION_PROMPT: &str = "You are a search query optimizer. Given the user's message and \
recent conversation, produce a single short, focused web search query (max 12 words) that will find the \
information the user needs. Resolve any references (like 'that website', 'him', 'it') using the \
conversation history. Output ONLY the search query, nothing else.";

/// History pairs given to the query extractor.
const EXTRACTION_HISTORY_PAIRS: usize = 3;

/// Per-turn character cap in the extraction prompt.
const EXTRACTION_TURN_CHARS: usize = 200;

/// Snippet cap in the client payload.
const PAYLOAD_SNIPPET_CHARS: usize = 500;

/// Web search collaborator.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> jarvis_search::Result<SearchResponse>;
}

#[async_trait]
impl WebSearch for SearchClient {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> jarvis_search::Result<SearchResponse> {
        SearchClient::search(self, query, options).await
    }
}

/// One source in the client-facing payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadSource {
    pub title: String,
    pub content: String,
    pub url: String,
    pub score: f64,
}

/// Structured search results forwarded to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPayload {
    pub query: String,
    pub answer: Option<String>,
    pub results: Vec<PayloadSource>,
}

/// Prompt block plus payload produced by one search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    /// Text injected into the system prompt; empty when nothing was found.
    pub formatted: String,
    pub payload: Option<SearchPayload>,
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }
}

/// Query extraction plus web search.
pub struct SearchAugmentor {
    fast: Option<Arc<dyn ChatProvider>>,
    search: Option<Arc<dyn WebSearch>>,
    options: SearchOptions,
    retry: RetryPolicy,
}

impl std::fmt::Debug for SearchAugmentor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchAugmentor")
            .field("fast", &self.fast.as_ref().map(|p| p.label()))
            .field("search", &self.search.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl SearchAugmentor {
    pub fn new(
        fast: Option<Arc<dyn ChatProvider>>,
        search: Option<Arc<dyn WebSearch>>,
        options: SearchOptions,
    ) -> Self {
        if search.is_none() {
            tracing::warn!("no search API key configured, realtime search unavailable");
        }
        Self {
            fast,
            search,
            options,
            retry: RetryPolicy::search(),
        }
    }

    /// Override the search retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    /// Compress the question and recent history into a search query.
    ///
    /// Returns the question unchanged when no fast model is configured, the
    /// call fails, or the answer is not 3 to 200 characters long.
    pub async fn extract_query(&self, question: &str, history: &[HistoryPair]) -> String {
        let Some(fast) = &self.fast else {
            return question.to_owned();
        };
        let started = Instant::now();
        let prompt = extraction_prompt(question, history);

        let raw = match fast.complete(&[Message::user(prompt)]).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "query extraction failed, using raw question");
                return question.to_owned();
            }
        };

        let extracted = clean_query(&raw);
        let len = extracted.chars().count();
        if (3..=200).contains(&len) {
            tracing::info!(
                question = %truncate_chars(question, 80),
                query = %truncate_chars(extracted, 80),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query extracted"
            );
            extracted.to_owned()
        } else {
            tracing::warn!("query extraction returned unusable result, using raw question");
            question.to_owned()
        }
    }

    /// Search for `query`. Never fails; problems yield an empty outcome.
    pub async fn search(&self, query: &str) -> SearchOutcome {
        let Some(client) = &self.search else {
            tracing::warn!("search requested but no client configured");
            return SearchOutcome::default();
        };
        let started = Instant::now();

        let response = match self
            .retry
            .run(|| client.search(query, &self.options))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "web search failed");
                return SearchOutcome::default();
            }
        };

        if response.is_empty() {
            tracing::warn!(query, "no search results");
            return SearchOutcome::default();
        }

        let outcome = format_results(query, &response, self.options.max_results);
        tracing::info!(
            results = response.results.len(),
            answer = response.answer.is_some(),
            formatted_chars = outcome.formatted.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );
        outcome
    }

    /// Extract a query and search for it.
    pub async fn augment(&self, question: &str, history: &[HistoryPair]) -> SearchOutcome {
        let query = self.extract_query(question, history).await;
        tracing::info!(query = %query, "searching the web");
        self.search(&query).await
    }
}

fn extraction_prompt(question: &str, history: &[HistoryPair]) -> String {
    let recent = &history[history.len().saturating_sub(EXTRACTION_HISTORY_PAIRS)..];
    if recent.is_empty() {
        return format!(
            "{QUERY_EXTRACTION_PROMPT}\n\nUser's latest message: {question}\n\nSearch query:"
        );
    }
    let conversation = recent
        .iter()
        .flat_map(|p| {
            [
                format!("User: {}", truncate_chars(&p.user, EXTRACTION_TURN_CHARS)),
                format!(
                    "Assistant: {}",
                    truncate_chars(&p.assistant, EXTRACTION_TURN_CHARS)
                ),
            ]
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{QUERY_EXTRACTION_PROMPT}\n\nRecent conversation:\n{conversation}\n\nUser's latest message: {question}\n\nSearch query:"
    )
}

fn clean_query(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim_matches('\'')
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

fn round2(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

/// Build the prompt block and client payload for a non-empty response.
pub fn format_results(query: &str, response: &SearchResponse, max_results: usize) -> SearchOutcome {
    let hits = &response.results[..response.results.len().min(max_results)];

    let mut parts = vec![format!("=== WEB SEARCH RESULTS FOR: {query} ===\n")];
    if let Some(answer) = &response.answer {
        parts.push(format!(
            "AI-SYNTHESIZED ANSWER (use this as your primary source):\n{answer}\n"
        ));
    }
    if !hits.is_empty() {
        parts.push("INDIVIDUAL SOURCES:".to_owned());
    }
    for (i, hit) in hits.iter().enumerate() {
        parts.push(format!("\n[Source {}] (relevance: {:.2})", i + 1, hit.score));
        parts.push(format!(
            "Title: {}",
            hit.title.as_deref().unwrap_or("No title")
        ));
        if !hit.content.is_empty() {
            parts.push(format!("Content: {}", hit.content));
        }
        if !hit.url.is_empty() {
            parts.push(format!("URL: {}", hit.url));
        }
    }
    parts.push("\n=== END SEARCH RESULTS ===".to_owned());

    let payload = SearchPayload {
        query: query.to_owned(),
        answer: response.answer.clone(),
        results: hits
            .iter()
            .map(|hit| PayloadSource {
                title: hit.title.clone().unwrap_or_else(|| "No title".to_owned()),
                content: truncate_chars(&hit.content, PAYLOAD_SNIPPET_CHARS).to_owned(),
                url: hit.url.clone(),
                score: round2(hit.score),
            })
            .collect(),
    };

    SearchOutcome {
        formatted: parts.join("\n"),
        payload: Some(payload),
    }
}
