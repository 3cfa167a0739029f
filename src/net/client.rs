//! HTTP client for the answering service.
//!
//! DESIGN
//! ======
//! One `POST {base}/chat` per question. The call is raced against a
//! cancellation token that a timer task fires after the configured duration.
//! Whichever side finishes first wins; the timer is aborted as soon as the
//! race resolves so a finished call can never be cancelled late.
//!
//! The base address is read at call time: an instance override if the client
//! was built with one, otherwise the process-wide slot in [`crate::config`].
//!
//! ERROR HANDLING
//! ==============
//! Timeouts are reported as [`ChatError::Timeout`], separate from transport
//! failures. Non-success statuses carry the service's `detail` text when the
//! error body has one.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ChatBackend;
use super::types::{ChatError, ChatRequest, ChatResponse, error_detail};
use crate::config::{self, ClientConfig};
use crate::state::Message;

pub struct ChatClient {
    http: reqwest::Client,
    base_url: Option<String>,
    timeout: Duration,
}

impl ChatClient {
    /// Build a client from typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ChatError::HttpClientBuild(e.to_string()))?;
        let base_url = config
            .base_url
            .map(|url| url.trim_end_matches('/').to_owned());
        Ok(Self { http, base_url, timeout: Duration::from_millis(config.request_timeout_ms) })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The base address this client will call right now.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url,
            None => config::api_base_url(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Send one question with its context.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Timeout`] when the call outlives the configured
    /// duration, [`ChatError::Server`] for non-success statuses,
    /// [`ChatError::Transport`] when no response arrives and
    /// [`ChatError::Decode`] for an unreadable success body.
    pub async fn send_message(
        &self,
        query: &str,
        selected_text: Option<&str>,
        history: &[Message],
    ) -> Result<ChatResponse, ChatError> {
        let request = ChatRequest::new(query, selected_text, history);
        let url = self.endpoint("/chat");
        info!(
            %url,
            query_chars = query.chars().count(),
            has_selection = request.selected_text.is_some(),
            history = request.conversation_history.len(),
            "chat request"
        );

        let token = CancellationToken::new();
        let timer = ArmedTimeout::arm(token.clone(), self.timeout);
        let outcome = tokio::select! {
            biased;
            result = self.post_chat(&url, &request) => result,
            () = token.cancelled() => Err(ChatError::Timeout { after_ms: millis(self.timeout) }),
        };
        timer.disarm();

        match &outcome {
            Ok(resp) => debug!(sources = resp.sources.len(), "chat response"),
            Err(e) => warn!(error = %e, retryable = e.retryable(), "chat request failed"),
        }
        outcome
    }

    async fn post_chat(&self, url: &str, request: &ChatRequest<'_>) -> Result<ChatResponse, ChatError> {
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // The error body is best effort; an unreadable one still reports the status.
            let detail = response.text().await.ok().as_deref().and_then(error_detail);
            return Err(ChatError::server(status.as_u16(), detail));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ChatError::Decode(e.to_string()))
    }

    /// Probe `GET {base}/health`. Any 2xx is healthy; everything else,
    /// including transport failures, is not.
    pub async fn check_health(&self) -> bool {
        let url = self.endpoint("/health");
        match self.http.get(&url).timeout(self.timeout).send().await {
            Ok(resp) => {
                debug!(%url, status = resp.status().as_u16(), "health probe");
                resp.status().is_success()
            }
            Err(e) => {
                debug!(%url, error = %e, "health probe failed");
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl ChatBackend for ChatClient {
    async fn send_message(
        &self,
        query: &str,
        selected_text: Option<&str>,
        history: &[Message],
    ) -> Result<ChatResponse, ChatError> {
        ChatClient::send_message(self, query, selected_text, history).await
    }
}

// =============================================================================
// TIMEOUT TIMER
// =============================================================================

/// A one-shot timer that cancels `token` after a delay unless disarmed first.
/// Dropping it also disarms.
struct ArmedTimeout {
    handle: JoinHandle<()>,
}

impl ArmedTimeout {
    fn arm(token: CancellationToken, after: Duration) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            token.cancel();
        });
        Self { handle }
    }

    fn disarm(self) {
        drop(self);
    }
}

impl Drop for ArmedTimeout {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;
