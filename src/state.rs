//! Conversation state and its transition set.
//!
//! DESIGN
//! ======
//! `ConversationState` is a plain value. Every change goes through
//! [`ConversationState::apply`], a total function from the current state and
//! a [`Transition`] to the next state. [`ConversationStore`] owns one state
//! and serializes callers through `dispatch`, so there is exactly one
//! mutation entry point per widget.
//!
//! The message log is append-only: no transition removes or reorders a
//! message except `ClearMessages`, which empties the log in bulk.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::selection::truncate_selection;

// =============================================================================
// MESSAGES
// =============================================================================

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A citation pointing at the documentation an answer was drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    /// URL or internal doc path.
    pub path: String,
    #[serde(default)]
    pub snippet: String,
}

/// One entry in the conversation log. Immutable once appended.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: SystemTime,
    /// Citations; only ever non-empty for assistant messages.
    pub sources: Vec<Source>,
}

/// The caller-supplied part of a message. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub sources: Vec<Source>,
}

impl NewMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), sources: Vec::new() }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self { role: Role::Assistant, content: content.into(), sources }
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Widget-scoped conversation state. Created once per mount, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub is_open: bool,
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Captured selection context, at most `MAX_SELECTION_CHARS` characters.
    pub selected_text: Option<String>,
}

/// The full set of state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Toggle,
    Open,
    Close,
    AppendMessage(NewMessage),
    SetLoading(bool),
    SetError(Option<String>),
    SetSelectedText(Option<String>),
    ClearMessages,
}

impl ConversationState {
    /// Apply one transition and return the next state. Never fails.
    #[must_use]
    pub fn apply(mut self, transition: Transition) -> Self {
        match transition {
            Transition::Toggle => self.is_open = !self.is_open,
            Transition::Open => self.is_open = true,
            Transition::Close => self.is_open = false,
            Transition::AppendMessage(partial) => {
                self.messages.push(Message {
                    id: Uuid::new_v4(),
                    role: partial.role,
                    content: partial.content,
                    timestamp: SystemTime::now(),
                    sources: partial.sources,
                });
            }
            Transition::SetLoading(flag) => self.is_loading = flag,
            Transition::SetError(error) => self.error = error,
            Transition::SetSelectedText(text) => {
                self.selected_text = text.map(|t| truncate_selection(&t).to_owned());
            }
            Transition::ClearMessages => self.messages.clear(),
        }
        self
    }

    /// The newest message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Owner of one [`ConversationState`]. All mutation goes through `dispatch`.
#[derive(Debug, Default)]
pub struct ConversationStore {
    state: ConversationState,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Apply a transition in place.
    pub fn dispatch(&mut self, transition: Transition) {
        tracing::trace!(?transition, "conversation transition");
        let current = std::mem::take(&mut self.state);
        self.state = current.apply(transition);
    }

    pub fn toggle_visibility(&mut self) {
        self.dispatch(Transition::Toggle);
    }

    pub fn open(&mut self) {
        self.dispatch(Transition::Open);
    }

    pub fn close(&mut self) {
        self.dispatch(Transition::Close);
    }

    /// Append a message and return the stored copy with its assigned id.
    pub fn append_message(&mut self, partial: NewMessage) -> &Message {
        self.dispatch(Transition::AppendMessage(partial));
        // AppendMessage always pushes, so the log is non-empty here.
        let idx = self.state.messages.len() - 1;
        &self.state.messages[idx]
    }

    pub fn set_loading(&mut self, flag: bool) {
        self.dispatch(Transition::SetLoading(flag));
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.dispatch(Transition::SetError(error));
    }

    pub fn set_selected_text(&mut self, text: Option<String>) {
        self.dispatch(Transition::SetSelectedText(text));
    }

    pub fn clear_messages(&mut self) {
        self.dispatch(Transition::ClearMessages);
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;
