//! HTTP API.
//!
//! ## Endpoints
//!
//! - `GET /api`: service name and endpoint list
//! - `GET /health`: component readiness
//! - `POST /chat`, `POST /chat/realtime`: full responses
//! - `POST /chat/stream`, `POST /chat/realtime/stream`: SSE, one JSON object per frame
//! - `GET /chat/history/{session_id}`: stored turns
//! - `POST /tts`: synthesize a single text to audio
//!
//! Errors are returned as `{"detail": "..."}`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::LatencyUnit;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use crate::chat::ChatService;
use crate::error::{AssistantError, RATE_LIMIT_MESSAGE};
use crate::prompt::ChatMode;
use crate::speech::{SpeechSynthesizer, Voice};
use crate::stream::{StreamCoordinator, StreamEvent};

/// Longest accepted chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 32_000;

/// Longest accepted `/tts` text, in characters.
pub const MAX_TTS_CHARS: usize = 5_000;

/// Events buffered between the generating task and a slow client.
const EVENT_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body of every `/chat*` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Omit to start a new session.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Interleave synthesized audio into the stream.
    #[serde(default)]
    pub tts: bool,
}

impl ChatRequest {
    fn validate(&self) -> crate::error::Result<()> {
        let len = self.message.chars().count();
        if len == 0 {
            return Err(AssistantError::InvalidRequest(
                "message must not be empty".into(),
            ));
        }
        if len > MAX_MESSAGE_CHARS {
            return Err(AssistantError::InvalidRequest(format!(
                "message must be at most {MAX_MESSAGE_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsRequest {
    pub text: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An HTTP error rendered as `{"detail": ..}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// Map a backend error, prefixing unexpected failures with `context`.
    fn from_assistant(err: &AssistantError, context: &str) -> Self {
        if err.is_client_error() {
            return Self::new(StatusCode::BAD_REQUEST, err.message());
        }
        if err.is_rate_limited() {
            return Self::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE);
        }
        if matches!(err, AssistantError::AllUpstreamFailed { .. }) {
            return Self::new(StatusCode::SERVICE_UNAVAILABLE, err.message());
        }
        tracing::error!(code = err.code(), error = %err, "{context}");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{context}: {}", err.message()),
        )
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        Self::from_assistant(&err, "Error processing chat")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// State and router
// ---------------------------------------------------------------------------

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub coordinator: StreamCoordinator,
    /// Synthesizer for `/tts`; `None` when speech is disabled.
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub voice: Voice,
    /// `Content-Type` of synthesized audio.
    pub audio_content_type: &'static str,
    /// Number of indexed context chunks.
    pub retrieval_chunks: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("chat", &self.chat)
            .field("coordinator", &self.coordinator)
            .field("speech", &self.speech.is_some())
            .field("voice", &self.voice)
            .field("retrieval_chunks", &self.retrieval_chunks)
            .finish()
    }
}

/// `Content-Type` for an OpenAI-style `response_format`.
pub fn audio_content_type(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "opus" => "audio/opus",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "pcm" => "audio/L16",
        _ => "application/octet-stream",
    }
}

/// Build the API router.
pub fn router(state: AppState, cors_allow_all: bool) -> Router {
    let app = Router::new()
        .route("/api", get(handle_index))
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/chat/realtime", post(handle_realtime))
        .route("/chat/realtime/stream", post(handle_realtime_stream))
        .route("/chat/history/{session_id}", get(handle_history))
        .route("/tts", post(handle_tts))
        .with_state(state);

    let app = if cors_allow_all {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };
    app.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(
                DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Millis),
            ),
    )
}

// ---------------------------------------------------------------------------
// Server lifecycle
// ---------------------------------------------------------------------------

/// A running API server.
pub struct ApiServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl ApiServer {
    /// Bind `{host}:{port}` (port `0` picks a free port) and serve `app`
    /// in a background task until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot bind.
    pub async fn start(
        app: Router,
        host: &str,
        port: u16,
        shutdown: CancellationToken,
    ) -> crate::error::Result<Self> {
        let bind_addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            AssistantError::Config(format!("failed to bind {bind_addr}: {e}"))
        })?;
        let addr = listener.local_addr()?;
        info!("API server listening on http://{addr}");

        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("API server error: {e}");
            }
        });

        Ok(Self {
            addr,
            handle,
            shutdown,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.wait().await;
    }

    /// Wait until the server task exits.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            tracing::error!("API server task failed: {e}");
        }
    }
}

impl std::fmt::Debug for ApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiServer").field("addr", &self.addr).finish()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// `GET /api`
async fn handle_index() -> Json<serde_json::Value> {
    Json(json!({
        "message": "J.A.R.V.I.S API",
        "endpoints": {
            "/chat": "General chat (non-streaming)",
            "/chat/stream": "General chat (streaming chunks)",
            "/chat/realtime": "Realtime chat with web search (non-streaming)",
            "/chat/realtime/stream": "Realtime chat with web search (streaming chunks)",
            "/chat/history/{session_id}": "Get chat history",
            "/tts": "Text-to-speech (POST text, returns audio)",
            "/health": "System health check",
        }
    }))
}

/// `GET /health`
async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.chat.sessions().len().await;
    Json(json!({
        "status": "healthy",
        "vector_store": state.retrieval_chunks > 0,
        "groq_service": true,
        "realtime_service": state.chat.augmentor().has_search(),
        "chat_service": true,
        "tts_service": state.speech.is_some(),
        "sessions": sessions,
    }))
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    complete_chat(state, payload, ChatMode::General).await
}

async fn handle_realtime(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    complete_chat(state, payload, ChatMode::Realtime).await
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    stream_chat(state, payload, ChatMode::General).await
}

async fn handle_realtime_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    stream_chat(state, payload, ChatMode::Realtime).await
}

async fn complete_chat(
    state: AppState,
    payload: Result<Json<ChatRequest>, JsonRejection>,
    mode: ChatMode,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    request.validate()?;
    let session_id = state
        .chat
        .get_or_create_session(request.session_id.as_deref())
        .await?;
    let response = state
        .chat
        .process_message(&session_id, &request.message, mode)
        .await?;
    Ok(Json(ChatResponse {
        response,
        session_id,
    }))
}

/// Open an SSE response for one message.
///
/// A background task drives the event stream and forwards frames through a
/// channel; when the client goes away the send fails, the task drops the
/// stream and pending speech jobs are cancelled.
async fn stream_chat(
    state: AppState,
    payload: Result<Json<ChatRequest>, JsonRejection>,
    mode: ChatMode,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    request.validate()?;
    let session_id = state
        .chat
        .get_or_create_session(request.session_id.as_deref())
        .await?;
    let upstream = state
        .chat
        .process_message_stream(&session_id, &request.message, mode)
        .await?;
    let mut events = state.coordinator.run(session_id, upstream, request.tts);

    let (tx, rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if tx.send(event).await.is_err() {
                tracing::debug!("client disconnected, stopping stream");
                break;
            }
        }
    });

    let frames = ReceiverStream::new(rx)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));
    let mut response = Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    Ok(response)
}

/// `GET /chat/history/{session_id}`
async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let turns = state
        .chat
        .get_chat_history(&session_id)
        .await
        .map_err(|e| ApiError::from_assistant(&e, "Error retrieving history"))?;
    let messages = turns
        .into_iter()
        .map(|t| HistoryMessage {
            role: t.role.as_str().to_owned(),
            content: t.content,
        })
        .collect();
    Ok(Json(HistoryResponse {
        session_id,
        messages,
    }))
}

/// `POST /tts`
async fn handle_tts(
    State(state): State<AppState>,
    payload: Result<Json<TtsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    if request.text.chars().count() > MAX_TTS_CHARS {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("text must be at most {MAX_TTS_CHARS} characters"),
        ));
    }
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Text is required"));
    }
    let Some(synth) = state.speech.as_ref() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Speech synthesis is not enabled",
        ));
    };

    let audio = synth
        .synthesize(text, &state.voice)
        .await
        .map_err(|e| ApiError::from_assistant(&e, "Error generating speech"))?;
    Ok((
        [
            (header::CONTENT_TYPE, state.audio_content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        audio,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::llm::provider::UpstreamError;

    #[test]
    fn message_length_bounds() {
        let mut req = ChatRequest {
            message: String::new(),
            session_id: None,
            tts: false,
        };
        assert!(req.validate().is_err());
        req.message = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(req.validate().is_ok());
        req.message.push('x');
        assert!(req.validate().is_err());
    }

    #[test]
    fn chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(req.session_id, None);
        assert!(!req.tts);
    }

    #[test]
    fn error_status_mapping() {
        let bad = ApiError::from(AssistantError::InvalidSession("bad id".into()));
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.detail, "bad id");

        let exhausted = ApiError::from(AssistantError::AllUpstreamFailed {
            rate_limited: false,
            source: None,
        });
        assert_eq!(exhausted.status, StatusCode::SERVICE_UNAVAILABLE);

        let limited = ApiError::from(AssistantError::AllUpstreamFailed {
            rate_limited: true,
            source: Some(UpstreamError::rate_limited("429")),
        });
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.detail, RATE_LIMIT_MESSAGE);

        let internal = ApiError::from(AssistantError::Internal("boom".into()));
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.detail, "Error processing chat: boom");
    }

    #[test]
    fn content_types() {
        assert_eq!(audio_content_type("mp3"), "audio/mpeg");
        assert_eq!(audio_content_type("WAV"), "audio/wav");
        assert_eq!(audio_content_type("ogg"), "application/octet-stream");
    }
}
