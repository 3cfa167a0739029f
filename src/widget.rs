//! Chat widget: wires input, selection and keyboard signals through the
//! answering service into the conversation store.
//!
//! DESIGN
//! ======
//! The widget's phase is derived from store flags, never stored separately:
//!
//! ```text
//! closed ──open/toggle──▶ open-idle ──send──▶ open-awaiting-response
//!    ▲                      ▲  ▲                    │          │
//!    │                      │  └─────── reply ──────┘          │ failure
//!    └── close / Escape ────┤                                  ▼
//!                           └──── dismiss / next send ──── open-error
//! ```
//!
//! A send is split in two halves so other events keep flowing while the
//! request is outstanding: [`ChatWidget::begin_send`] applies the outbound
//! transitions and returns a [`PendingTurn`] that owns everything the request
//! needs; [`ChatWidget::finish_send`] applies the outcome. [`ChatWidget::run`]
//! drives both halves from a single task, so state is still only touched from
//! one place.
//!
//! Closing the widget does not cancel an outstanding request. Its outcome is
//! applied whenever it lands, visible or not.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::net::{ChatBackend, ChatError, ChatResponse};
use crate::state::{ConversationState, ConversationStore, Message, NewMessage, Transition};

const KEY_BUS_CAPACITY: usize = 16;

type TurnOutcome = Result<ChatResponse, ChatError>;

// =============================================================================
// PHASE
// =============================================================================

/// Observable widget phase, derived from `is_open`, `is_loading` and `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Idle,
    AwaitingResponse,
    Error,
}

impl Phase {
    #[must_use]
    pub fn of(state: &ConversationState) -> Self {
        if !state.is_open {
            Self::Closed
        } else if state.is_loading {
            Self::AwaitingResponse
        } else if state.error.is_some() {
            Self::Error
        } else {
            Self::Idle
        }
    }
}

// =============================================================================
// HOST SEAMS
// =============================================================================

/// Keyboard signals the widget cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySignal {
    Escape,
    Other,
}

/// Host keyboard broadcast. Widgets subscribe while mounted.
#[derive(Debug, Clone)]
pub struct KeyBus {
    tx: broadcast::Sender<KeySignal>,
}

impl Default for KeyBus {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(KEY_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish a key press. Returns how many listeners received it.
    pub fn press(&self, key: KeySignal) -> usize {
        self.tx.send(key).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<KeySignal> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// The output surface the widget draws on.
pub trait Surface {
    /// Redraw after any transition.
    fn render(&mut self, state: &ConversationState);

    /// Bring the newest content into view. Called after every change to the
    /// message log or the loading flag.
    fn scroll_to_latest(&mut self, state: &ConversationState);
}

/// Host-side actions delivered to [`ChatWidget::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetEvent {
    Toggle,
    Open,
    Close,
    Send(String),
    DismissError,
    ClearSelection,
    ClearConversation,
}

/// Why a send was refused. Refusals never touch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendRejected {
    #[error("message is empty")]
    Empty,
    #[error("a response is still pending")]
    Busy,
    #[error("the chat window is closed")]
    Closed,
}

// =============================================================================
// PENDING TURN
// =============================================================================

/// Everything one outbound request needs, detached from the widget.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    query: String,
    selected_text: Option<String>,
    /// Log snapshot taken before the user's message was appended.
    history: Vec<Message>,
}

impl PendingTurn {
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn selected_text(&self) -> Option<&str> {
        self.selected_text.as_deref()
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Turn this into the owned request future.
    pub fn request<B>(self, backend: Arc<B>) -> BoxFuture<'static, TurnOutcome>
    where
        B: ChatBackend + ?Sized + 'static,
    {
        async move {
            backend
                .send_message(&self.query, self.selected_text.as_deref(), &self.history)
                .await
        }
        .boxed()
    }
}

// =============================================================================
// WIDGET
// =============================================================================

pub struct ChatWidget<B: ?Sized, S> {
    store: ConversationStore,
    backend: Arc<B>,
    surface: S,
    keys: Option<broadcast::Receiver<KeySignal>>,
}

impl<B, S> ChatWidget<B, S>
where
    B: ChatBackend + ?Sized + 'static,
    S: Surface,
{
    /// Create fresh conversation state and attach the dismissal key listener.
    pub fn mount(backend: Arc<B>, surface: S, keys: &KeyBus) -> Self {
        let mut widget = Self { store: ConversationStore::new(), backend, surface, keys: Some(keys.subscribe()) };
        info!("chat widget mounted");
        widget.surface.render(widget.store.state());
        widget
    }

    /// Detach the key listener and discard conversation state.
    pub fn unmount(self) -> S {
        info!(messages = self.store.state().messages.len(), "chat widget unmounted");
        self.surface
    }

    #[must_use]
    pub fn state(&self) -> &ConversationState {
        self.store.state()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::of(self.store.state())
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[must_use]
    pub fn has_key_listener(&self) -> bool {
        self.keys.is_some()
    }

    fn update<I>(&mut self, transitions: I)
    where
        I: IntoIterator<Item = Transition>,
    {
        let before = scroll_key(self.store.state());
        for transition in transitions {
            self.store.dispatch(transition);
        }
        let state = self.store.state();
        self.surface.render(state);
        if scroll_key(state) != before {
            self.surface.scroll_to_latest(state);
        }
    }

    // -------------------------------------------------------------------------
    // Visibility and banners
    // -------------------------------------------------------------------------

    pub fn toggle(&mut self) {
        self.update([Transition::Toggle]);
    }

    pub fn open(&mut self) {
        self.update([Transition::Open]);
    }

    pub fn close(&mut self) {
        self.update([Transition::Close]);
    }

    /// Clear the error banner without touching history.
    pub fn dismiss_error(&mut self) {
        self.update([Transition::SetError(None)]);
    }

    pub fn clear_selection(&mut self) {
        self.update([Transition::SetSelectedText(None)]);
    }

    pub fn clear_conversation(&mut self) {
        self.update([Transition::ClearMessages]);
    }

    /// Apply a tracker update. Only non-empty selections are captured; a
    /// cleared document selection keeps the previous context.
    pub fn on_selection(&mut self, selection: Option<String>) {
        if let Some(text) = selection {
            self.update([Transition::SetSelectedText(Some(text))]);
        }
    }

    /// Escape closes the widget, but only while it is open.
    pub fn on_key(&mut self, key: KeySignal) {
        if key == KeySignal::Escape && self.store.state().is_open {
            debug!("dismissal key closed the widget");
            self.close();
        }
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Validate input and apply the outbound half of a turn.
    ///
    /// # Errors
    ///
    /// Returns [`SendRejected`] for blank input, while a response is pending,
    /// or while the widget is closed.
    pub fn begin_send(&mut self, input: &str) -> Result<PendingTurn, SendRejected> {
        let query = input.trim();
        let state = self.store.state();
        if query.is_empty() {
            return Err(SendRejected::Empty);
        }
        if !state.is_open {
            return Err(SendRejected::Closed);
        }
        if state.is_loading {
            return Err(SendRejected::Busy);
        }

        let pending = PendingTurn {
            query: query.to_owned(),
            selected_text: state.selected_text.clone(),
            history: state.messages.clone(),
        };
        info!(
            query_chars = query.chars().count(),
            has_selection = pending.selected_text.is_some(),
            history = pending.history.len(),
            "sending question"
        );
        self.update([
            Transition::AppendMessage(NewMessage::user(query)),
            Transition::SetError(None),
            Transition::SetLoading(true),
        ]);
        Ok(pending)
    }

    /// Apply the outcome of the outstanding request.
    ///
    /// Returns `false` and changes nothing when no request is outstanding.
    pub fn finish_send(&mut self, outcome: TurnOutcome) -> bool {
        if !self.store.state().is_loading {
            warn!("response arrived with no request outstanding; ignored");
            return false;
        }
        if !self.store.state().is_open {
            debug!("applying response while closed");
        }

        match outcome {
            Ok(reply) => {
                self.update([
                    Transition::AppendMessage(NewMessage::assistant(reply.response, reply.sources)),
                    Transition::SetError(None),
                    Transition::SetLoading(false),
                ]);
            }
            Err(e) => {
                warn!(error = %e, timeout = e.is_timeout(), "question failed");
                self.update([Transition::SetError(Some(e.to_string())), Transition::SetLoading(false)]);
            }
        }
        true
    }

    /// Send and wait for the reply in one call.
    ///
    /// # Errors
    ///
    /// Returns [`SendRejected`] if the send is refused. Request failures are
    /// not errors here; they land in the `error` field.
    pub async fn send(&mut self, input: &str) -> Result<(), SendRejected> {
        let pending = self.begin_send(input)?;
        let outcome = pending.request(Arc::clone(&self.backend)).await;
        self.finish_send(outcome);
        Ok(())
    }

    fn handle_event(&mut self, event: WidgetEvent, in_flight: &mut Option<BoxFuture<'static, TurnOutcome>>) {
        match event {
            WidgetEvent::Toggle => self.toggle(),
            WidgetEvent::Open => self.open(),
            WidgetEvent::Close => self.close(),
            WidgetEvent::DismissError => self.dismiss_error(),
            WidgetEvent::ClearSelection => self.clear_selection(),
            WidgetEvent::ClearConversation => self.clear_conversation(),
            WidgetEvent::Send(text) => match self.begin_send(&text) {
                Ok(pending) => *in_flight = Some(pending.request(Arc::clone(&self.backend))),
                Err(rejected) => warn!(%rejected, "send rejected"),
            },
        }
    }

    /// Drive the widget until the host event channel closes.
    ///
    /// One task owns the widget; host events, key presses, selection updates
    /// and the single in-flight request are multiplexed here in arrival
    /// order. Returns the widget so the host can inspect or unmount it. A
    /// request still outstanding at that point is dropped and the loading
    /// flag cleared, so the returned widget accepts sends again.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<WidgetEvent>,
        mut selection: Option<watch::Receiver<Option<String>>>,
    ) -> Self {
        let mut in_flight: Option<BoxFuture<'static, TurnOutcome>> = None;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.handle_event(event, &mut in_flight);
                }
                outcome = next_outcome(&mut in_flight) => {
                    in_flight = None;
                    self.finish_send(outcome);
                }
                key = next_key(&mut self.keys) => match key {
                    Some(key) => self.on_key(key),
                    None => self.keys = None,
                },
                update = next_selection(&mut selection) => match update {
                    Some(value) => self.on_selection(value),
                    None => selection = None,
                },
            }
        }

        if in_flight.take().is_some() {
            debug!("host closed with a request outstanding; dropping it");
            self.update([Transition::SetLoading(false)]);
        }
        self
    }
}

/// What auto-scroll watches: log length, newest id and the loading flag.
fn scroll_key(state: &ConversationState) -> (usize, Option<Uuid>, bool) {
    (state.messages.len(), state.last_message().map(|m| m.id), state.is_loading)
}

async fn next_outcome(slot: &mut Option<BoxFuture<'static, TurnOutcome>>) -> TurnOutcome {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_key(keys: &mut Option<broadcast::Receiver<KeySignal>>) -> Option<KeySignal> {
    let Some(rx) = keys else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(key) => return Some(key),
            Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "key signals dropped"),
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn next_selection(rx: &mut Option<watch::Receiver<Option<String>>>) -> Option<Option<String>> {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    match rx.changed().await {
        Ok(()) => Some((*rx.borrow_and_update()).clone()),
        Err(_) => None,
    }
}

#[cfg(test)]
#[path = "widget_test.rs"]
mod widget_test;
