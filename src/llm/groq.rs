//! OpenAI-compatible chat-completions adapter (Groq by default).
//!
//! Streams `POST {base_url}/v1/chat/completions` with `stream: true` and
//! turns `choices[].delta.content` fragments into text deltas.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::json;

use super::credential::Credential;
use super::message::Message;
use super::provider::{ChatProvider, DeltaStream, UpstreamError};
use super::sse::{SseEvent, SseLineParser};

/// Settings for one provider instance.
#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub credential: Credential,
    /// Base URL without `/v1`, e.g. `https://api.groq.com/openai`.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl GroqConfig {
    pub fn new(credential: Credential, model: impl Into<String>) -> Self {
        Self {
            credential,
            base_url: "https://api.groq.com/openai".to_owned(),
            model: model.into(),
            temperature: 0.8,
            max_tokens: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Build the chat-completions request body.
pub fn build_request(config: &GroqConfig, messages: &[Message], stream: bool) -> serde_json::Value {
    let mut body = json!({
        "model": config.model,
        "messages": messages,
        "temperature": config.temperature,
        "stream": stream,
    });
    if let Some(max) = config.max_tokens {
        body["max_tokens"] = json!(max);
    }
    body
}

/// Result of parsing one streamed chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Text to forward (may be empty for role-only or finish chunks).
    Delta(String),
    /// The provider reported an error inside the stream.
    Error(String),
}

/// Parse one `data:` payload of a streamed completion.
pub fn parse_stream_chunk(data: &str) -> ChunkOutcome {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return ChunkOutcome::Error(format!("malformed stream chunk: {e}")),
    };
    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| err.to_string());
        return ChunkOutcome::Error(message);
    }
    let text = value
        .get("choices")
        .and_then(|c| c.as_array())
        .map(|choices| {
            choices
                .iter()
                .filter_map(|c| c.pointer("/delta/content").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default();
    ChunkOutcome::Delta(text)
}

/// Extract the assistant text from a whole (non-streamed) response.
pub fn parse_completion(body: &str) -> Result<String, UpstreamError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| UpstreamError::other(format!("malformed completion response: {e}")))?;
    value
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(String::from)
        .ok_or_else(|| UpstreamError::other("completion response has no message content"))
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_owned())
}

/// Chat-completions adapter for one credential.
pub struct GroqProvider {
    config: GroqConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for GroqProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqProvider")
            .field("credential", &self.config.credential)
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl GroqProvider {
    /// Create a provider. Fails only if the HTTP client cannot be built.
    ///
    /// `timeout` bounds connecting and each body read; a streamed answer may
    /// run longer as long as deltas keep arriving. Whole completions are also
    /// capped at `timeout` per request.
    pub fn new(config: GroqConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn post(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response, UpstreamError> {
        let body = build_request(&self.config, messages, stream);
        let mut request = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.credential.expose())
            .json(&body);
        if !stream {
            request = request.timeout(self.config.timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_text(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(
                status.as_u16(),
                extract_error_message(&text),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for GroqProvider {
    fn label(&self) -> String {
        self.config.credential.to_string()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, UpstreamError> {
        let response = self.post(messages, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_text(format!("failed to read response: {e}")))?;
        parse_completion(&text)
    }

    async fn stream(&self, messages: &[Message]) -> Result<DeltaStream, UpstreamError> {
        let response = self.post(messages, true).await?;
        Ok(Box::pin(delta_stream(response.bytes_stream())))
    }
}

struct StreamState<S> {
    bytes: S,
    parser: SseLineParser,
    queued: std::collections::VecDeque<SseEvent>,
    finished: bool,
}

/// Turn a raw SSE byte stream into text deltas, ending at `[DONE]`.
fn delta_stream<S>(bytes: S) -> impl Stream<Item = Result<String, UpstreamError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    futures_util::stream::unfold(
        StreamState {
            bytes: Box::pin(bytes),
            parser: SseLineParser::new(),
            queued: std::collections::VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if state.finished {
                    return None;
                }
                if let Some(event) = state.queued.pop_front() {
                    if event.is_done() {
                        return None;
                    }
                    match parse_stream_chunk(&event.data) {
                        ChunkOutcome::Delta(text) if text.is_empty() => continue,
                        ChunkOutcome::Delta(text) => return Some((Ok(text), state)),
                        ChunkOutcome::Error(message) => {
                            state.finished = true;
                            return Some((Err(UpstreamError::from_text(message)), state));
                        }
                    }
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let events = state.parser.push(&chunk);
                        state.queued.extend(events);
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((
                            Err(UpstreamError::from_text(format!("stream read error: {e}"))),
                            state,
                        ));
                    }
                    None => match state.parser.flush() {
                        Some(event) => state.queued.push_back(event),
                        None => return None,
                    },
                }
            }
        },
    )
}
