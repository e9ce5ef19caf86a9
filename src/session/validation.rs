//! Session identifier checks.
//!
//! Ids reach the filesystem as part of a file name, so anything that could
//! escape the chats directory is rejected before memory or disk is touched.

use crate::error::{AssistantError, Result};

/// Longest accepted session id, in characters.
pub const MAX_SESSION_ID_LEN: usize = 255;

/// Reject empty, path-like or overlong session ids.
pub fn validate_session_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(AssistantError::InvalidSession(
            "session id must not be empty".into(),
        ));
    }
    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(AssistantError::InvalidSession(format!(
            "session id {id:?} must not contain path traversal characters"
        )));
    }
    if id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(AssistantError::InvalidSession(format!(
            "session id must be at most {MAX_SESSION_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// File name holding a session: dashes removed, spaces become underscores.
pub fn session_file_name(id: &str) -> String {
    let safe: String = id
        .chars()
        .filter(|c| *c != '-')
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    format!("chat_{safe}.json")
}
