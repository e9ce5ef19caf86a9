//! Chat-completion plumbing: message types, the upstream provider seam,
//! the OpenAI-compatible adapter, SSE parsing and credential fallback.

pub mod credential;
pub mod fallback;
pub mod groq;
pub mod message;
pub mod provider;
pub mod sse;

pub use credential::Credential;
pub use fallback::{ProviderFallbackClient, TextStream};
pub use groq::{GroqConfig, GroqProvider};
pub use message::{Message, Role};
pub use provider::{ChatProvider, DeltaStream, UpstreamError, UpstreamErrorKind};
