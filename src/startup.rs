//! Startup wiring: turns an [`AssistantConfig`] into ready-to-serve
//! [`AppState`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use jarvis_search::{SearchClient, SearchConfig, SearchOptions};
use tracing::{info, warn};

use crate::chat::{ChatService, ChatSettings};
use crate::config::AssistantConfig;
use crate::error::{AssistantError, Result};
use crate::llm::{ChatProvider, Credential, GroqConfig, GroqProvider, ProviderFallbackClient};
use crate::prompt::PromptBuilder;
use crate::realtime::{SearchAugmentor, WebSearch};
use crate::retrieval::{ContextRetriever, LocalIndex};
use crate::server::{AppState, audio_content_type};
use crate::session::{FileSessionStore, SessionRegistry};
use crate::speech::{HttpSpeechSynthesizer, SpeechPool, SpeechSynthesizer, Voice};
use crate::stream::StreamCoordinator;

/// One provider per configured key, in configuration order.
pub fn build_providers(config: &AssistantConfig) -> Result<Vec<Arc<dyn ChatProvider>>> {
    let llm = &config.llm;
    Credential::from_keys(&llm.api_keys)
        .into_iter()
        .map(|credential| {
            let provider = GroqProvider::new(
                GroqConfig::new(credential, llm.model.clone())
                    .with_base_url(llm.base_url.clone())
                    .with_temperature(llm.temperature)
                    .with_timeout(Duration::from_secs(llm.request_timeout_secs)),
            )?;
            Ok(Arc::new(provider) as Arc<dyn ChatProvider>)
        })
        .collect()
}

/// Deterministic, short-output provider used for search-query extraction.
///
/// Uses the first key. Returns `None` when no keys are configured.
pub fn build_fast_provider(config: &AssistantConfig) -> Result<Option<Arc<dyn ChatProvider>>> {
    let llm = &config.llm;
    let Some(credential) = Credential::from_keys(&llm.api_keys).into_iter().next() else {
        return Ok(None);
    };
    let provider = GroqProvider::new(
        GroqConfig::new(credential, llm.model.clone())
            .with_base_url(llm.base_url.clone())
            .with_temperature(0.0)
            .with_max_tokens(llm.fast_max_tokens)
            .with_timeout(Duration::from_secs(llm.fast_timeout_secs)),
    )?;
    Ok(Some(Arc::new(provider)))
}

fn build_search(config: &AssistantConfig) -> Result<Option<Arc<dyn WebSearch>>> {
    let settings = &config.search;
    let Some(key) = settings.api_key.as_deref() else {
        return Ok(None);
    };
    let search_config = SearchConfig {
        timeout_seconds: settings.timeout_secs,
        cache_ttl_seconds: settings.cache_ttl_secs,
        ..SearchConfig::new(key).with_base_url(settings.base_url.clone())
    };
    let client = SearchClient::new(search_config)
        .map_err(|e| AssistantError::Config(format!("search client: {e}")))?;
    Ok(Some(Arc::new(client)))
}

async fn build_index(config: &AssistantConfig) -> Result<Option<LocalIndex>> {
    if !config.retrieval.enabled {
        info!("context retrieval disabled");
        return Ok(None);
    }
    let retrieval = config.retrieval.clone();
    let chats_dir = config.session.chats_dir.clone();
    let started = Instant::now();
    let index = tokio::task::spawn_blocking(move || LocalIndex::build(&retrieval, &chats_dir))
        .await
        .map_err(|e| AssistantError::Retrieval(format!("index build task failed: {e}")))?;
    info!(
        chunks = index.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "context index ready"
    );
    Ok(Some(index))
}

/// Build every service and return the handler state.
///
/// # Errors
///
/// Fails on invalid configuration or when an HTTP client cannot be built.
pub async fn build_state(config: &AssistantConfig) -> Result<AppState> {
    config.validate()?;

    let llm = Arc::new(ProviderFallbackClient::new(build_providers(config)?)?);
    info!(credentials = llm.len(), model = %config.llm.model, "chat providers ready");

    let search = build_search(config)?;
    let options = SearchOptions {
        depth: config.search.depth,
        max_results: config.search.max_results,
        include_answer: config.search.include_answer,
    };
    let augmentor = Arc::new(SearchAugmentor::new(
        build_fast_provider(config)?,
        search,
        options,
    ));

    let mut prompts = PromptBuilder::new(&config.persona);
    let mut retrieval_chunks = 0;
    if let Some(index) = build_index(config).await? {
        retrieval_chunks = index.len();
        let retriever: Arc<dyn ContextRetriever> = Arc::new(index);
        prompts = prompts.with_retriever(retriever, config.retrieval.top_k);
    }

    let store = FileSessionStore::new(config.session.chats_dir.clone())?;
    let sessions = Arc::new(SessionRegistry::new(Arc::new(store)));
    let chat = Arc::new(ChatService::new(
        llm,
        prompts,
        augmentor,
        sessions,
        ChatSettings {
            max_history_turns: config.session.max_history_turns,
            save_every_n_deltas: config.session.save_every_n_deltas,
        },
    ));

    let voice = Voice::new(config.tts.voice.clone(), config.tts.rate.clone());
    let speech: Option<Arc<dyn SpeechSynthesizer>> = if config.tts.enabled {
        Some(Arc::new(HttpSpeechSynthesizer::new(&config.tts)?))
    } else {
        warn!("speech synthesis disabled, streams will be text only");
        None
    };
    let pool = speech
        .as_ref()
        .map(|s| SpeechPool::new(Arc::clone(s), voice.clone(), config.tts.workers));
    let coordinator = StreamCoordinator::new(
        pool,
        Duration::from_secs(config.tts.drain_timeout_secs),
    );

    Ok(AppState {
        chat,
        coordinator,
        speech,
        voice,
        audio_content_type: audio_content_type(&config.tts.response_format),
        retrieval_chunks,
    })
}
