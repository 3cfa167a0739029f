//! Debounced tracking of the reader's text selection.
//!
//! DESIGN
//! ======
//! The host forwards raw `selectionchange` / `pointerup` signals. Each signal
//! replaces the single pending evaluation slot: the previous timer task is
//! aborted and a new one sleeps for the quiet period before reading the
//! selection. Only the last signal in a burst is evaluated.
//!
//! Results are published on a `watch` channel, so any number of consumers can
//! subscribe, and a late subscriber still sees the current value.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SELECTION_QUIET_PERIOD_MS;

/// Longest selection carried as request context, in characters.
pub const MAX_SELECTION_CHARS: usize = 2000;

// =============================================================================
// HOST SEAM
// =============================================================================

/// A snapshot of the host document's selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSelection {
    pub text: String,
    /// `true` for a zero-width caret selection.
    pub collapsed: bool,
}

/// Read access to the host document's current selection.
///
/// Returning `None` covers both "nothing selected" and "no selection API".
pub trait SelectionSource: Send + Sync + 'static {
    fn snapshot(&self) -> Option<RawSelection>;
}

/// Raw host notifications that schedule a re-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSignal {
    SelectionChange,
    PointerUp,
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Cut `text` to at most [`MAX_SELECTION_CHARS`] characters.
#[must_use]
pub fn truncate_selection(text: &str) -> &str {
    match text.char_indices().nth(MAX_SELECTION_CHARS) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Reduce a raw selection to the tracked value.
///
/// Collapsed or whitespace-only selections yield `None`; anything else is
/// trimmed and truncated.
#[must_use]
pub fn evaluate(raw: Option<&RawSelection>) -> Option<String> {
    let raw = raw?;
    if raw.collapsed {
        return None;
    }
    evaluate_text(&raw.text)
}

/// Reduce selection text supplied directly by the host, such as a passage
/// passed on the command line.
#[must_use]
pub fn evaluate_text(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(truncate_selection(text).to_owned())
}

// =============================================================================
// TRACKER
// =============================================================================

/// Debounces selection signals into a `watch` stream of `Option<String>`.
///
/// Must be used from within a tokio runtime; dropping the tracker cancels any
/// pending evaluation.
pub struct SelectionTracker {
    source: Arc<dyn SelectionSource>,
    quiet_period: Duration,
    pending: Option<JoinHandle<()>>,
    tx: Arc<watch::Sender<Option<String>>>,
}

impl SelectionTracker {
    #[must_use]
    pub fn new(source: Arc<dyn SelectionSource>) -> Self {
        Self::with_quiet_period(source, Duration::from_millis(SELECTION_QUIET_PERIOD_MS))
    }

    #[must_use]
    pub fn with_quiet_period(source: Arc<dyn SelectionSource>, quiet_period: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { source, quiet_period, pending: None, tx: Arc::new(tx) }
    }

    /// Subscribe to tracked selection updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    /// The most recently evaluated selection.
    #[must_use]
    pub fn current(&self) -> Option<String> {
        (*self.tx.borrow()).clone()
    }

    /// `true` while an evaluation is scheduled but has not run yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Record a raw host signal, replacing any pending evaluation.
    pub fn signal(&mut self, signal: SelectionSignal) {
        if let Some(previous) = self.pending.take() {
            previous.abort();
        }

        let source = Arc::clone(&self.source);
        let tx = Arc::clone(&self.tx);
        let quiet_period = self.quiet_period;
        tracing::trace!(?signal, "selection evaluation scheduled");

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            let next = evaluate(source.snapshot().as_ref());
            tx.send_if_modified(|current| {
                if *current == next {
                    return false;
                }
                tracing::debug!(chars = next.as_ref().map(|t| t.chars().count()), "selection changed");
                *current = next;
                true
            });
        }));
    }
}

impl Drop for SelectionTracker {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
#[path = "selection_test.rs"]
mod selection_test;
