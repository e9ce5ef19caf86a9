//! Speech synthesis backends.
//!
//! The default backend talks to an OpenAI-compatible speech endpoint
//! (`POST {base_url}/v1/audio/speech`) and returns the encoded audio bytes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::config::TtsConfig;
use crate::error::{AssistantError, Result};

/// Voice selection plus relative speaking rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    /// Relative rate such as `+22%`, `-10%` or `0%`.
    pub rate: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, rate: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rate: rate.into(),
        }
    }

    /// Speed multiplier for the rate string. `+22%` is `1.22`.
    ///
    /// Unparseable rates fall back to `1.0`; results are clamped to
    /// `0.25..=4.0`.
    pub fn speed(&self) -> f32 {
        let raw = self.rate.trim().trim_end_matches('%').trim();
        let raw = raw.strip_prefix('+').unwrap_or(raw);
        match raw.parse::<f32>() {
            Ok(pct) if pct.is_finite() => (1.0 + pct / 100.0).clamp(0.25, 4.0),
            _ => 1.0,
        }
    }
}

/// Converts one sentence to encoded audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &Voice) -> Result<Bytes>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
}

/// Synthesizer backed by an OpenAI-compatible `/v1/audio/speech` endpoint.
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    response_format: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpSpeechSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSpeechSynthesizer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("response_format", &self.response_format)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpSpeechSynthesizer {
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AssistantError::Speech(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            response_format: config.response_format.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/audio/speech", self.base_url)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: &Voice) -> Result<Bytes> {
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &voice.name,
            response_format: &self.response_format,
            speed: voice.speed(),
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AssistantError::Speech(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AssistantError::Speech(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| AssistantError::Speech(format!("failed to read audio: {e}")))?;
        if audio.is_empty() {
            return Err(AssistantError::Speech("empty audio response".to_owned()));
        }
        Ok(audio)
    }
}
