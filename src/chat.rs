//! Conversation orchestration.
//!
//! [`ChatService`] ties sessions, prompt assembly, optional web search and
//! the upstream client together. Both modes share one code path; realtime
//! mode adds a [`SearchAugmentor`] step whose formatted results become an
//! extra system block.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};

use crate::error::Result;
use crate::llm::fallback::ProviderFallbackClient;
use crate::prompt::{ChatMode, PromptBuilder};
use crate::realtime::{SearchAugmentor, SearchPayload};
use crate::session::{ChatTurn, SessionHandle, SessionRegistry, format_history};

/// Item of a streamed chat response.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    /// Text to show (and speak).
    Delta(String),
    /// Web search results, forwarded before any text.
    Search(SearchPayload),
}

/// Streamed chat response. Ends with at most one `Err`.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Tunables for [`ChatService`].
#[derive(Debug, Clone, Copy)]
pub struct ChatSettings {
    /// History pairs sent to the model.
    pub max_history_turns: usize,
    /// Persist a streaming session every N deltas.
    pub save_every_n_deltas: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_history_turns: 20,
            save_every_n_deltas: 5,
        }
    }
}

/// Chat entry point used by the HTTP layer.
pub struct ChatService {
    llm: Arc<ProviderFallbackClient>,
    prompts: PromptBuilder,
    augmentor: Arc<SearchAugmentor>,
    sessions: Arc<SessionRegistry>,
    settings: ChatSettings,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("llm", &self.llm)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatService {
    pub fn new(
        llm: Arc<ProviderFallbackClient>,
        prompts: PromptBuilder,
        augmentor: Arc<SearchAugmentor>,
        sessions: Arc<SessionRegistry>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            llm,
            prompts,
            augmentor,
            sessions,
            settings: ChatSettings {
                save_every_n_deltas: settings.save_every_n_deltas.max(1),
                ..settings
            },
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn augmentor(&self) -> &Arc<SearchAugmentor> {
        &self.augmentor
    }

    /// Resolve or create a session and return its id.
    pub async fn get_or_create_session(&self, id: Option<&str>) -> Result<String> {
        self.sessions.get_or_create(id).await.map(|(id, _)| id)
    }

    /// Ordered turns of a session; empty when unknown.
    pub async fn get_chat_history(&self, id: &str) -> Result<Vec<ChatTurn>> {
        self.sessions.history(id).await
    }

    /// Persist every resident session.
    pub async fn save_all(&self) {
        self.sessions.save_all().await;
    }

    /// Answer a message with a whole response.
    pub async fn process_message(&self, session_id: &str, message: &str, mode: ChatMode) -> Result<String> {
        let (_, handle) = self.sessions.get_or_create(Some(session_id)).await?;
        tracing::info!(
            session = %short_id(session_id),
            mode = mode.as_str(),
            message = %preview(message, 200),
            "processing message"
        );

        let history = {
            let mut turns = handle.lock().await;
            turns.push(ChatTurn::user(message));
            format_history(&turns, true, self.settings.max_history_turns)
        };
        tracing::info!(history_pairs = history.len(), "history prepared");

        let extra = match mode {
            ChatMode::General => Vec::new(),
            ChatMode::Realtime => {
                let outcome = self.augmentor.augment(message, &history).await;
                if outcome.is_empty() {
                    Vec::new()
                } else {
                    vec![outcome.formatted]
                }
            }
        };

        let messages = self.prompts.build(message, &history, &extra, mode);
        let response = self.llm.invoke(&messages).await?;

        handle.lock().await.push(ChatTurn::assistant(response.clone()));
        tracing::info!(
            chars = response.len(),
            preview = %preview(&response, 120),
            mode = mode.as_str(),
            "response ready"
        );
        self.sessions.save(session_id).await;
        Ok(response)
    }

    /// Answer a message incrementally.
    ///
    /// The user turn and an empty assistant turn are recorded before this
    /// returns; the assistant turn grows as deltas arrive. The session is
    /// saved every `save_every_n_deltas` deltas and once more when the
    /// stream ends or is dropped.
    pub async fn process_message_stream(
        &self,
        session_id: &str,
        message: &str,
        mode: ChatMode,
    ) -> Result<ChatStream> {
        let (id, handle) = self.sessions.get_or_create(Some(session_id)).await?;
        tracing::info!(
            session = %short_id(&id),
            mode = mode.as_str(),
            message = %preview(message, 200),
            "processing streamed message"
        );

        let (history, slot) = {
            let mut turns = handle.lock().await;
            turns.push(ChatTurn::user(message));
            turns.push(ChatTurn::assistant(""));
            (
                format_history(&turns, true, self.settings.max_history_turns),
                turns.len() - 1,
            )
        };
        tracing::info!(history_pairs = history.len(), "history prepared");

        let llm = Arc::clone(&self.llm);
        let prompts = self.prompts.clone();
        let augmentor = Arc::clone(&self.augmentor);
        let sessions = Arc::clone(&self.sessions);
        let save_every = self.settings.save_every_n_deltas;
        let question = message.to_owned();

        Ok(Box::pin(async_stream::stream! {
            let mut guard = SaveOnDrop::new(Arc::clone(&sessions), id.clone());

            let mut extra = Vec::new();
            if mode == ChatMode::Realtime {
                let outcome = augmentor.augment(&question, &history).await;
                if let Some(payload) = outcome.payload {
                    yield Ok(ChatChunk::Search(payload));
                    extra.push(outcome.formatted);
                }
            }

            let messages = prompts.build(&question, &history, &extra, mode);
            let mut upstream = llm.stream(messages);
            let mut deltas = 0usize;
            let mut failure = None;

            while let Some(item) = upstream.next().await {
                match item {
                    Ok(delta) => {
                        deltas += 1;
                        let snapshot = append_delta(&handle, slot, &delta, deltas % save_every == 0).await;
                        if let Some(turns) = snapshot {
                            sessions.save_quiet(&id, &turns).await;
                        }
                        yield Ok(ChatChunk::Delta(delta));
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            let chars = handle
                .lock()
                .await
                .get(slot)
                .map_or(0, |t| t.content.len());
            tracing::info!(deltas, chars, mode = mode.as_str(), "stream completed");
            guard.disarm();
            sessions.save(&id).await;

            if let Some(e) = failure {
                yield Err(e);
            }
        }))
    }
}

/// Grow the assistant turn at `slot`; return a snapshot when a save is due.
async fn append_delta(
    handle: &SessionHandle,
    slot: usize,
    delta: &str,
    snapshot: bool,
) -> Option<Vec<ChatTurn>> {
    let mut turns = handle.lock().await;
    if let Some(turn) = turns.get_mut(slot) {
        turn.content.push_str(delta);
    }
    snapshot.then(|| turns.clone())
}

/// Saves the session if a stream is dropped before it finishes.
struct SaveOnDrop {
    sessions: Arc<SessionRegistry>,
    id: String,
    armed: bool,
}

impl SaveOnDrop {
    fn new(sessions: Arc<SessionRegistry>, id: String) -> Self {
        Self {
            sessions,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SaveOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let sessions = Arc::clone(&self.sessions);
        let id = std::mem::take(&mut self.id);
        tracing::debug!(session = %short_id(&id), "stream dropped, saving session");
        runtime.spawn(async move { sessions.save(&id).await });
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((i, _)) => &id[..i],
        None => id,
    }
}

fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::stream;
    use jarvis_search::SearchOptions;

    use super::*;
    use crate::config::PersonaConfig;
    use crate::error::AssistantError;
    use crate::llm::message::{Message, Role};
    use crate::llm::provider::{ChatProvider, DeltaStream, UpstreamError};
    use crate::session::store::FileSessionStore;

    /// Replies with fixed deltas and records the messages it was sent.
    struct EchoProvider {
        deltas: Vec<&'static str>,
        fail_after: Option<usize>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl EchoProvider {
        fn new(deltas: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                deltas,
                fail_after: None,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn label(&self) -> String {
            "#1 test".into()
        }

        async fn complete(&self, messages: &[Message]) -> std::result::Result<String, UpstreamError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.deltas.concat())
        }

        async fn stream(&self, messages: &[Message]) -> std::result::Result<DeltaStream, UpstreamError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut items: Vec<std::result::Result<String, UpstreamError>> =
                self.deltas.iter().map(|d| Ok((*d).to_owned())).collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(UpstreamError::other("connection reset")));
            }
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn service(dir: &std::path::Path, provider: Arc<EchoProvider>) -> ChatService {
        let llm = ProviderFallbackClient::new(vec![provider as Arc<dyn ChatProvider>]).unwrap();
        let store = FileSessionStore::new(dir).unwrap();
        ChatService::new(
            Arc::new(llm),
            PromptBuilder::new(&PersonaConfig::default()),
            Arc::new(SearchAugmentor::new(None, None, SearchOptions::default())),
            Arc::new(SessionRegistry::new(Arc::new(store))),
            ChatSettings {
                max_history_turns: 20,
                save_every_n_deltas: 2,
            },
        )
    }

    #[tokio::test]
    async fn whole_response_records_both_turns() {
        let dir = tempfile::tempdir().unwrap();
        let provider = EchoProvider::new(vec!["Hello", " there."]);
        let svc = service(dir.path(), provider.clone());
        let id = svc.get_or_create_session(None).await.unwrap();

        let reply = svc.process_message(&id, "Hi", ChatMode::General).await.unwrap();
        assert_eq!(reply, "Hello there.");
        let turns = svc.get_chat_history(&id).await.unwrap();
        assert_eq!(turns, vec![ChatTurn::user("Hi"), ChatTurn::assistant("Hello there.")]);

        svc.process_message(&id, "Again", ChatMode::General).await.unwrap();
        let seen = provider.seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second[0].role, Role::System);
        assert_eq!(second[1].content, "Hi");
        assert_eq!(second[2].content, "Hello there.");
        assert_eq!(second.last().unwrap().content, "Again");
        assert_eq!(second.len(), 4);
    }

    #[tokio::test]
    async fn whole_response_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), EchoProvider::new(vec!["Saved."]));
        svc.process_message("persisted", "Store this", ChatMode::General)
            .await
            .unwrap();
        let raw = std::fs::read_to_string(dir.path().join("chat_persisted.json")).unwrap();
        assert!(raw.contains("Store this"));
        assert!(raw.contains("Saved."));
    }

    #[tokio::test]
    async fn stream_grows_assistant_turn() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), EchoProvider::new(vec!["One ", "two ", "three."]));
        let stream = svc
            .process_message_stream("s1", "Count", ChatMode::General)
            .await
            .unwrap();
        let chunks: Vec<ChatChunk> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(
            chunks,
            vec![
                ChatChunk::Delta("One ".into()),
                ChatChunk::Delta("two ".into()),
                ChatChunk::Delta("three.".into()),
            ]
        );
        let turns = svc.get_chat_history("s1").await.unwrap();
        assert_eq!(turns[1], ChatTurn::assistant("One two three."));

        let reloaded = crate::session::store::parse_session_json(
            &std::fs::read_to_string(dir.path().join("chat_s1.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(reloaded, turns);
    }

    #[tokio::test]
    async fn stream_failure_saves_partial_and_ends_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(EchoProvider {
            deltas: vec!["Partial ", "answer ", "lost"],
            fail_after: Some(2),
            seen: Mutex::new(Vec::new()),
        });
        let svc = service(dir.path(), provider);
        let stream = svc
            .process_message_stream("broken", "Go", ChatMode::General)
            .await
            .unwrap();
        let items: Vec<Result<ChatChunk>> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Err(AssistantError::Stream(_))));

        let raw = std::fs::read_to_string(dir.path().join("chat_broken.json")).unwrap();
        assert!(raw.contains("Partial answer "));
    }

    #[tokio::test]
    async fn invalid_session_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), EchoProvider::new(vec!["x"]));
        let err = svc.process_message("../etc/passwd", "hi", ChatMode::General).await;
        assert!(matches!(err, Err(AssistantError::InvalidSession(_))));
        assert!(
            svc.process_message_stream("a/b", "hi", ChatMode::General)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn realtime_without_search_streams_text_only() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), EchoProvider::new(vec!["Sunny."]));
        let chunks: Vec<ChatChunk> = svc
            .process_message_stream("rt", "Weather?", ChatMode::Realtime)
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![ChatChunk::Delta("Sunny.".into())]);
    }

    #[test]
    fn short_id_and_preview_respect_char_boundaries() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("short"), "short");
        assert_eq!(preview("h\u{e9}llo", 2), "h\u{e9}");
    }
}
