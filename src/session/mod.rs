//! Conversation sessions: identifiers, turns, durable storage and the
//! in-memory registry that owns resident sessions.
//!
//! A session is created on the first message with no id, or on the first
//! reference to an id that is neither resident nor on disk.

pub mod registry;
pub mod store;
pub mod validation;

use serde::{Deserialize, Serialize};

use crate::llm::message::{Message, Role};

pub use registry::{SessionHandle, SessionRegistry};
pub use store::{FileSessionStore, SessionStore};
pub use validation::{MAX_SESSION_ID_LEN, session_file_name, validate_session_id};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for Message {
    fn from(turn: &ChatTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// A completed (user, assistant) exchange, used as model context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPair {
    pub user: String,
    pub assistant: String,
}

/// Pair consecutive user/assistant turns, skipping anything out of step.
///
/// With `exclude_last` the final turn (the one being answered) is ignored.
/// Only the most recent `max_pairs` pairs are returned.
pub fn format_history(turns: &[ChatTurn], exclude_last: bool, max_pairs: usize) -> Vec<HistoryPair> {
    let turns = match (exclude_last, turns.split_last()) {
        (true, Some((_, rest))) => rest,
        _ => turns,
    };

    let mut pairs = Vec::new();
    let mut i = 0;
    while i + 1 < turns.len() {
        let (first, second) = (&turns[i], &turns[i + 1]);
        if first.role == Role::User && second.role == Role::Assistant {
            pairs.push(HistoryPair {
                user: first.content.clone(),
                assistant: second.content.clone(),
            });
            i += 2;
        } else {
            i += 1;
        }
    }

    if pairs.len() > max_pairs {
        pairs.drain(..pairs.len() - max_pairs);
    }
    pairs
}
