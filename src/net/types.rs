//! Wire types for the answering service and the errors its client reports.

use serde::{Deserialize, Serialize};

use crate::state::{Message, Role, Source};

/// Most recent log entries carried as conversation history.
pub const MAX_HISTORY_MESSAGES: usize = 10;

// =============================================================================
// ERROR
// =============================================================================

/// Failures from one answering-service call.
///
/// `Display` is the user-facing banner text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The call did not complete inside the configured duration.
    #[error("Request timed out. Please try again.")]
    Timeout { after_ms: u64 },

    /// The service answered with a non-success status.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// The request never produced a response (connect, DNS, reset...).
    #[error("Network error: {0}")]
    Transport(String),

    /// A success response whose body is not a chat response.
    #[error("Unexpected response from the assistant: {0}")]
    Decode(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ChatError {
    /// Build a server error, preferring the service's own detail text.
    #[must_use]
    pub fn server(status: u16, detail: Option<String>) -> Self {
        let message = detail
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Request failed with status {status}"));
        Self::Server { status, message }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether sending the same turn again could succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_) | Self::Server { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// One history entry as sent on the wire: role and content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry<'a> {
    pub role: Role,
    pub content: &'a str,
}

/// `POST /chat` body.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<HistoryEntry<'a>>,
}

impl<'a> ChatRequest<'a> {
    /// Assemble a request, trimming history and dropping an empty selection.
    #[must_use]
    pub fn new(query: &'a str, selected_text: Option<&'a str>, history: &'a [Message]) -> Self {
        Self {
            query,
            selected_text: selected_text.filter(|s| !s.is_empty()),
            conversation_history: trim_history(history),
        }
    }
}

/// Keep the last [`MAX_HISTORY_MESSAGES`] entries, in order, as role/content.
#[must_use]
pub fn trim_history(history: &[Message]) -> Vec<HistoryEntry<'_>> {
    let skip = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
    history[skip..]
        .iter()
        .map(|m| HistoryEntry { role: m.role, content: &m.content })
        .collect()
}

// =============================================================================
// RESPONSE
// =============================================================================

/// `POST /chat` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// Extract a string `detail` from an error body, if there is one.
///
/// Validation errors carry a list under `detail`; those are ignored.
#[must_use]
pub fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("detail")?.as_str().map(str::to_owned)
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
