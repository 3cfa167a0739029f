//! Answering-service access.
//!
//! DESIGN
//! ======
//! `ChatBackend` is the seam the widget talks to. [`client::ChatClient`] is
//! the HTTP implementation; tests substitute in-memory backends. The trait is
//! stateless per call: every invocation carries the query, the optional
//! selection context and the log snapshot it should draw history from.
//! The health probe is host tooling, so it stays on `ChatClient`.

pub mod client;
pub mod types;

pub use client::ChatClient;
pub use types::{ChatError, ChatRequest, ChatResponse};

use crate::state::Message;

#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Ask one question. `history` is the full log; implementations trim it.
    async fn send_message(
        &self,
        query: &str,
        selected_text: Option<&str>,
        history: &[Message],
    ) -> Result<ChatResponse, ChatError>;
}
