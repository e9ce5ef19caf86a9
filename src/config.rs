//! Configuration for the assistant backend.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables, so secrets can stay out of the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AssistantError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Chat-completion provider settings.
    pub llm: LlmConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Web search settings (realtime mode).
    pub search: SearchSettings,
    /// Session persistence and history settings.
    pub session: SessionConfig,
    /// Local context retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Assistant persona.
    pub persona: PersonaConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Send `Access-Control-Allow-Origin: *` on every response.
    pub cors_allow_all: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
            cors_allow_all: true,
        }
    }
}

/// Chat-completion provider configuration.
///
/// One provider instance is built per entry in `api_keys`; the order of the
/// list is the fallback order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/v1`).
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Timeout for main chat calls, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for the auxiliary query-extraction call, in seconds.
    pub fast_timeout_secs: u64,
    /// Token cap for the auxiliary query-extraction call.
    pub fast_max_tokens: u32,
    /// Ordered credentials. Never serialized back out.
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai".to_owned(),
            model: "llama-3.3-70b-versatile".to_owned(),
            temperature: 0.8,
            request_timeout_secs: 60,
            fast_timeout_secs: 15,
            fast_max_tokens: 50,
            api_keys: Vec::new(),
        }
    }
}

/// Speech synthesis configuration (OpenAI-compatible `/v1/audio/speech`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    /// Relative speaking rate such as `+22%` or `-10%`.
    pub rate: String,
    pub response_format: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Concurrent synthesis jobs shared by all requests.
    pub workers: usize,
    /// Per-job wait when flushing audio at the end of a stream, in seconds.
    pub drain_timeout_secs: u64,
    /// HTTP timeout for one synthesis call, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8880".to_owned(),
            model: "tts-1".to_owned(),
            voice: "en-GB-RyanNeural".to_owned(),
            rate: "+22%".to_owned(),
            response_format: "mp3".to_owned(),
            api_key: None,
            workers: 4,
            drain_timeout_secs: 15,
            request_timeout_secs: 30,
        }
    }
}

/// Web search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Search is disabled when no key is configured.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_results: usize,
    /// `basic` or `advanced`.
    pub depth: jarvis_search::SearchDepth,
    pub include_answer: bool,
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: jarvis_search::config::DEFAULT_BASE_URL.to_owned(),
            max_results: 7,
            depth: jarvis_search::SearchDepth::Advanced,
            include_answer: true,
            timeout_secs: 20,
            cache_ttl_secs: 300,
        }
    }
}

/// Session persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding `chat_*.json` files.
    pub chats_dir: PathBuf,
    /// Persist a streaming session every N deltas.
    pub save_every_n_deltas: usize,
    /// Number of (user, assistant) pairs sent to the model.
    pub max_history_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chats_dir: PathBuf::from("database/chats_data"),
            save_every_n_deltas: 5,
            max_history_turns: 20,
        }
    }
}

/// Local retrieval index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub enabled: bool,
    /// Directory of `*.txt` files describing the user.
    pub learning_data_dir: PathBuf,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Chunks retrieved per question.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            learning_data_dir: PathBuf::from("database/learning_data"),
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 10,
        }
    }
}

/// Persona configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub assistant_name: String,
    /// How the assistant may address the user, e.g. "Sir".
    pub user_title: Option<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Jarvis".to_owned(),
            user_title: None,
        }
    }
}

impl AssistantConfig {
    /// Default config file location: `<config dir>/jarvis/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("jarvis").join("config.toml"))
    }

    /// Read a config file from disk and deserialize it.
    ///
    /// # Errors
    /// Returns `AssistantError::Config` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AssistantError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|e| {
            AssistantError::Config(format!(
                "failed to parse config file '{}': {e}",
                path.display()
            ))
        })
    }

    /// Load configuration: file (if it exists) then process environment.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                tracing::info!(path = %p.display(), "loading config file");
                Self::from_file(p)?
            }
            Some(p) => {
                tracing::info!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Credentials are read from `GROQ_API_KEY`, then `GROQ_API_KEY_2`,
    /// `GROQ_API_KEY_3`, ... stopping at the first missing number. When any
    /// are present they replace the file's list.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let mut keys = Vec::new();
        if let Some(first) = get("GROQ_API_KEY") {
            keys.push(first);
        }
        let mut n = 2;
        while let Some(k) = get(&format!("GROQ_API_KEY_{n}")) {
            keys.push(k);
            n += 1;
        }
        if !keys.is_empty() {
            self.llm.api_keys = keys;
        }

        if let Some(model) = get("GROQ_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = get("TAVILY_API_KEY") {
            self.search.api_key = Some(key);
        }
        if let Some(voice) = get("TTS_VOICE") {
            self.tts.voice = voice;
        }
        if let Some(rate) = get("TTS_RATE") {
            self.tts.rate = rate;
        }
        if let Some(key) = get("TTS_API_KEY") {
            self.tts.api_key = Some(key);
        }
        if let Some(name) = get("ASSISTANT_NAME") {
            self.persona.assistant_name = name;
        }
        if let Some(title) = get("JARVIS_USER_TITLE") {
            self.persona.user_title = Some(title);
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `AssistantError::Config` for zero credentials, malformed URLs
    /// or zero-valued limits.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_keys.is_empty() {
            return Err(AssistantError::Config(
                "no chat API keys configured; set GROQ_API_KEY (and optionally GROQ_API_KEY_2, ...)"
                    .into(),
            ));
        }
        check_url("llm.base_url", &self.llm.base_url)?;
        if self.tts.enabled {
            check_url("tts.base_url", &self.tts.base_url)?;
            if self.tts.workers == 0 {
                return Err(AssistantError::Config(
                    "tts.workers must be greater than 0".into(),
                ));
            }
        }
        if self.session.save_every_n_deltas == 0 {
            return Err(AssistantError::Config(
                "session.save_every_n_deltas must be greater than 0".into(),
            ));
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            return Err(AssistantError::Config(
                "retrieval.chunk_overlap must be smaller than retrieval.chunk_size".into(),
            ));
        }
        Ok(())
    }

    /// Create the data directories if they don't exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.session.chats_dir)?;
        std::fs::create_dir_all(&self.retrieval.learning_data_dir)?;
        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AssistantError::Config(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AssistantError::Config(format!(
            "{field} must use http or https"
        )));
    }
    Ok(())
}
