//! Jarvis: a streaming chat-assistant backend.
//!
//! Answers user messages through an OpenAI-compatible chat API with ordered
//! credential fallback, optionally grounding answers in web search, and
//! streams text, search results and synthesized audio to clients over SSE.
//!
//! # Architecture
//!
//! - **LLM**: provider adapter, SSE parsing and credential fallback ([`llm`])
//! - **Prompting**: persona, local context retrieval and history ([`prompt`], [`retrieval`])
//! - **Realtime**: search-query extraction and result formatting ([`realtime`])
//! - **Sessions**: in-memory registry backed by JSON files ([`session`])
//! - **Speech**: sentence segmentation and bounded parallel synthesis ([`speech`])
//! - **Streaming**: the per-request event state machine ([`stream`])
//! - **HTTP**: axum routes and SSE framing ([`server`])

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod realtime;
pub mod retrieval;
pub mod retry;
pub mod server;
pub mod session;
pub mod speech;
pub mod startup;
pub mod stream;

pub use chat::{ChatChunk, ChatService, ChatSettings};
pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
pub use prompt::ChatMode;
pub use server::{ApiServer, AppState};
pub use stream::{StreamCoordinator, StreamEvent};
