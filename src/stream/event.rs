//! Events sent to streaming clients, one JSON object per SSE frame.
//!
//! | Event | JSON |
//! |---|---|
//! | open | `{"session_id": .., "chunk": "", "done": false}` |
//! | text | `{"chunk": .., "done": false}` |
//! | search | `{"search_results": ..}` |
//! | audio | `{"audio": <base64>, "sentence": ..}` |
//! | done | `{"chunk": "", "done": true, "session_id": ..}` |
//! | error | `{"chunk": "", "done": true, "error": ..}` |

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::realtime::SearchPayload;
use crate::speech::AudioEvent;

/// One client-facing stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Open { session_id: String },
    Text(String),
    SearchResults(SearchPayload),
    Audio { audio: Bytes, sentence: String },
    Done { session_id: String },
    Error { message: String },
}

impl StreamEvent {
    /// True for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Serialize to a JSON line. Serialization of these shapes cannot fail.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize stream event");
            r#"{"chunk":"","done":true,"error":"internal serialization error"}"#.to_owned()
        })
    }
}

impl From<AudioEvent> for StreamEvent {
    fn from(event: AudioEvent) -> Self {
        Self::Audio {
            audio: event.audio,
            sentence: event.sentence,
        }
    }
}

impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Open { session_id } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("session_id", session_id)?;
                map.serialize_entry("chunk", "")?;
                map.serialize_entry("done", &false)?;
                map.end()
            }
            Self::Text(chunk) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("chunk", chunk)?;
                map.serialize_entry("done", &false)?;
                map.end()
            }
            Self::SearchResults(payload) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("search_results", payload)?;
                map.end()
            }
            Self::Audio { audio, sentence } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("audio", &STANDARD.encode(audio))?;
                map.serialize_entry("sentence", sentence)?;
                map.end()
            }
            Self::Done { session_id } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("chunk", "")?;
                map.serialize_entry("done", &true)?;
                map.serialize_entry("session_id", session_id)?;
                map.end()
            }
            Self::Error { message } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("chunk", "")?;
                map.serialize_entry("done", &true)?;
                map.serialize_entry("error", message)?;
                map.end()
            }
        }
    }
}
