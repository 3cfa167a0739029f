use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::config::ClientConfig;
use crate::net::ChatClient;
use crate::state::{Role, Source};

// =============================================================
// Test doubles
// =============================================================

#[derive(Debug, Clone)]
struct Captured {
    query: String,
    selected_text: Option<String>,
    history: Vec<String>,
}

#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<TurnOutcome>>,
    calls: Mutex<Vec<Captured>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    fn new(replies: Vec<TurnOutcome>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), ..Self::default() })
    }

    fn delayed(replies: Vec<TurnOutcome>, delay: Duration) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), delay: Some(delay), ..Self::default() })
    }

    fn calls(&self) -> Vec<Captured> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send_message(
        &self,
        query: &str,
        selected_text: Option<&str>,
        history: &[Message],
    ) -> Result<ChatResponse, ChatError> {
        self.calls.lock().unwrap().push(Captured {
            query: query.to_owned(),
            selected_text: selected_text.map(str::to_owned),
            history: history.iter().map(|m| m.content.clone()).collect(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(reply("default reply")))
    }
}

/// Records what the widget asked the surface to do.
#[derive(Debug, Default)]
struct RecordingSurface {
    renders: usize,
    /// `(message count, is_loading)` at each scroll request.
    scrolls: Vec<(usize, bool)>,
}

impl Surface for RecordingSurface {
    fn render(&mut self, _state: &ConversationState) {
        self.renders += 1;
    }

    fn scroll_to_latest(&mut self, state: &ConversationState) {
        self.scrolls.push((state.messages.len(), state.is_loading));
    }
}

fn reply(text: &str) -> ChatResponse {
    ChatResponse { response: text.to_owned(), sources: Vec::new() }
}

fn mounted(backend: Arc<ScriptedBackend>) -> (ChatWidget<ScriptedBackend, RecordingSurface>, KeyBus) {
    let keys = KeyBus::new();
    let widget = ChatWidget::mount(backend, RecordingSurface::default(), &keys);
    (widget, keys)
}

// =============================================================
// Mount / visibility
// =============================================================

#[test]
fn mount_attaches_and_unmount_detaches_key_listener() {
    let keys = KeyBus::new();
    let widget = ChatWidget::mount(ScriptedBackend::new(vec![]), RecordingSurface::default(), &keys);
    assert_eq!(keys.listener_count(), 1);
    assert!(widget.has_key_listener());
    assert_eq!(widget.phase(), Phase::Closed);

    let surface = widget.unmount();
    assert_eq!(keys.listener_count(), 0);
    assert_eq!(surface.renders, 1);
}

#[test]
fn toggle_open_close_drive_phase() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![]));
    widget.toggle();
    assert_eq!(widget.phase(), Phase::Idle);
    widget.toggle();
    assert_eq!(widget.phase(), Phase::Closed);
    widget.open();
    widget.open();
    assert_eq!(widget.phase(), Phase::Idle);
    widget.close();
    assert_eq!(widget.phase(), Phase::Closed);
}

#[test]
fn visibility_changes_do_not_scroll() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![]));
    widget.open();
    widget.close();
    assert!(widget.surface().scrolls.is_empty());
    assert_eq!(widget.surface().renders, 3);
}

#[test]
fn escape_closes_only_while_open() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![]));
    widget.on_key(KeySignal::Escape);
    assert_eq!(widget.phase(), Phase::Closed);
    let renders = widget.surface().renders;
    assert_eq!(renders, 1, "escape while closed must not transition");

    widget.open();
    widget.on_key(KeySignal::Other);
    assert_eq!(widget.phase(), Phase::Idle);
    widget.on_key(KeySignal::Escape);
    assert_eq!(widget.phase(), Phase::Closed);
}

// =============================================================
// Sending
// =============================================================

#[tokio::test]
async fn first_question_success_appends_user_then_assistant() {
    let backend = ScriptedBackend::new(vec![Ok(reply("A PID controller is..."))]);
    let (mut widget, _keys) = mounted(backend.clone());
    widget.open();

    widget.send("What is a PID controller?").await.unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].query, "What is a PID controller?");
    assert_eq!(calls[0].selected_text, None);
    assert!(calls[0].history.is_empty());

    let state = widget.state();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].role, Role::User);
    assert_eq!(state.messages[1].role, Role::Assistant);
    assert_eq!(state.messages[1].content, "A PID controller is...");
    assert!(!state.is_loading);
    assert!(state.error.is_none());
    assert_eq!(widget.phase(), Phase::Idle);
}

#[tokio::test]
async fn server_failure_keeps_user_message_and_sets_error() {
    let backend = ScriptedBackend::new(vec![Err(ChatError::server(500, Some("model unavailable".into())))]);
    let (mut widget, _keys) = mounted(backend);
    widget.open();

    widget.send("hello").await.unwrap();

    let state = widget.state();
    assert_eq!(state.error.as_deref(), Some("model unavailable"));
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].role, Role::User);
    assert!(!state.is_loading);
    assert_eq!(widget.phase(), Phase::Error);
}

#[tokio::test]
async fn dismissal_returns_to_idle_without_losing_history() {
    let backend = ScriptedBackend::new(vec![Err(ChatError::Transport("refused".into()))]);
    let (mut widget, _keys) = mounted(backend);
    widget.open();
    widget.send("hello").await.unwrap();
    assert_eq!(widget.phase(), Phase::Error);

    widget.dismiss_error();
    assert_eq!(widget.phase(), Phase::Idle);
    assert_eq!(widget.state().messages.len(), 1);
}

#[tokio::test]
async fn next_send_clears_error_and_recovers() {
    let backend = ScriptedBackend::new(vec![Err(ChatError::Timeout { after_ms: 30_000 })]);
    let (mut widget, _keys) = mounted(backend);
    widget.open();

    widget.send("first").await.unwrap();
    assert_eq!(widget.state().error.as_deref(), Some("Request timed out. Please try again."));

    let pending = widget.begin_send("again").unwrap();
    assert!(widget.state().error.is_none());
    assert_eq!(widget.phase(), Phase::AwaitingResponse);
    drop(pending);
    widget.finish_send(Ok(reply("second try")));

    assert_eq!(widget.phase(), Phase::Idle);
    let contents: Vec<&str> = widget
        .state()
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, ["first", "again", "second try"]);
}

#[tokio::test]
async fn history_is_the_log_before_the_current_question() {
    let backend = ScriptedBackend::new(vec![Ok(reply("r1")), Ok(reply("r2"))]);
    let (mut widget, _keys) = mounted(backend.clone());
    widget.open();

    widget.send("q1").await.unwrap();
    widget.send("  q2  ").await.unwrap();

    let calls = backend.calls();
    assert!(calls[0].history.is_empty());
    assert_eq!(calls[1].query, "q2");
    assert_eq!(calls[1].history, ["q1", "r1"]);
}

#[tokio::test]
async fn assistant_sources_are_kept() {
    let source = Source { title: "Tuning".into(), path: "/docs/pid/tuning".into(), snippet: "Ziegler".into() };
    let backend = ScriptedBackend::new(vec![Ok(ChatResponse { response: "tune it".into(), sources: vec![source.clone()] })]);
    let (mut widget, _keys) = mounted(backend);
    widget.open();
    widget.send("how?").await.unwrap();

    assert_eq!(widget.state().messages[1].sources, vec![source]);
    assert!(widget.state().messages[0].sources.is_empty());
}

#[test]
fn blank_closed_and_busy_sends_are_rejected_without_transitions() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![]));

    assert_eq!(widget.begin_send("hi").unwrap_err(), SendRejected::Closed);
    widget.open();
    assert_eq!(widget.begin_send("   \n").unwrap_err(), SendRejected::Empty);

    let _pending = widget.begin_send("first").unwrap();
    let before = widget.state().clone();
    assert_eq!(widget.begin_send("second").unwrap_err(), SendRejected::Busy);
    assert_eq!(widget.state(), &before);
}

#[test]
fn selection_context_is_captured_and_sent() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![]));
    widget.open();

    widget.on_selection(Some("derivative kick".into()));
    widget.on_selection(None);
    assert_eq!(widget.state().selected_text.as_deref(), Some("derivative kick"));

    let pending = widget.begin_send("explain").unwrap();
    assert_eq!(pending.selected_text(), Some("derivative kick"));
    assert_eq!(pending.query(), "explain");
    assert!(pending.history().is_empty());
}

#[test]
fn clear_selection_removes_context() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![]));
    widget.on_selection(Some("ctx".into()));
    widget.clear_selection();
    assert!(widget.state().selected_text.is_none());
}

#[tokio::test]
async fn clear_conversation_empties_log() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![Ok(reply("r"))]));
    widget.open();
    widget.send("q").await.unwrap();
    widget.clear_conversation();
    assert!(widget.state().messages.is_empty());
    assert_eq!(widget.surface().scrolls.last(), Some(&(0, false)));
}

// =============================================================
// Loading flag and auto-scroll
// =============================================================

#[tokio::test]
async fn each_turn_scrolls_on_send_and_on_reply() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![Ok(reply("r"))]));
    widget.open();
    widget.send("q").await.unwrap();
    assert_eq!(widget.surface().scrolls, [(1, true), (2, false)]);
}

#[test]
fn timeout_clears_loading_exactly_once() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![]));
    widget.open();
    let _pending = widget.begin_send("slow").unwrap();

    assert!(widget.finish_send(Err(ChatError::Timeout { after_ms: 30_000 })));
    assert!(!widget.finish_send(Ok(reply("late"))));

    assert_eq!(widget.surface().scrolls, [(1, true), (1, false)]);
    assert_eq!(widget.state().messages.len(), 1);
    assert_eq!(widget.state().error.as_deref(), Some("Request timed out. Please try again."));
}

#[test]
fn response_after_close_is_still_applied() {
    let (mut widget, _keys) = mounted(ScriptedBackend::new(vec![]));
    widget.open();
    let _pending = widget.begin_send("q").unwrap();
    widget.close();

    assert!(widget.finish_send(Ok(reply("answer while hidden"))));
    assert_eq!(widget.phase(), Phase::Closed);
    assert_eq!(widget.state().messages.len(), 2);
    assert!(!widget.state().is_loading);
}

// =============================================================
// Event loop
// =============================================================

#[tokio::test(start_paused = true)]
async fn run_loop_processes_events_keys_and_selection_in_one_task() {
    let backend = ScriptedBackend::delayed(vec![Ok(reply("late answer"))], Duration::from_secs(1));
    let keys = KeyBus::new();
    let widget = ChatWidget::mount(backend.clone(), RecordingSurface::default(), &keys);
    let (tx, rx) = mpsc::channel(8);
    let (sel_tx, sel_rx) = watch::channel(None);
    let handle = tokio::spawn(widget.run(rx, Some(sel_rx)));

    tx.send(WidgetEvent::Open).await.unwrap();
    sel_tx.send(Some("selected passage".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    tx.send(WidgetEvent::Send("What does this mean?".into())).await.unwrap();
    tx.send(WidgetEvent::Send("double send".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(keys.press(KeySignal::Escape), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    drop(tx);

    let widget = handle.await.unwrap();
    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].selected_text.as_deref(), Some("selected passage"));

    let state = widget.state();
    assert!(!state.is_open);
    assert!(!state.is_loading);
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].content, "late answer");
}

#[tokio::test]
async fn run_returns_when_host_channel_closes() {
    let keys = KeyBus::new();
    let widget = ChatWidget::mount(ScriptedBackend::new(vec![]), RecordingSurface::default(), &keys);
    let (tx, rx) = mpsc::channel(1);
    drop(tx);

    let widget = widget.run(rx, None).await;
    assert_eq!(widget.phase(), Phase::Closed);
    drop(widget);
    assert_eq!(keys.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn closing_host_channel_mid_request_clears_loading() {
    let backend = ScriptedBackend::delayed(vec![Ok(reply("never seen"))], Duration::from_secs(5));
    let keys = KeyBus::new();
    let widget = ChatWidget::mount(backend.clone(), RecordingSurface::default(), &keys);
    let (tx, rx) = mpsc::channel(8);
    let handle = tokio::spawn(widget.run(rx, None));

    tx.send(WidgetEvent::Open).await.unwrap();
    tx.send(WidgetEvent::Send("slow question".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.calls().len(), 1);
    drop(tx);

    let mut widget = handle.await.unwrap();
    assert!(!widget.state().is_loading);
    assert_eq!(widget.phase(), Phase::Idle);
    assert_eq!(widget.state().messages.len(), 1);
    assert!(widget.begin_send("next").is_ok());
}

// =============================================================
// End to end against an HTTP service
// =============================================================

#[tokio::test]
async fn end_to_end_success_through_http_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_json(json!({ "query": "What is a PID controller?" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "A PID controller is...",
            "sources": [],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = Arc::new(ChatClient::new(ClientConfig::default().with_base_url(server.uri())).unwrap());
    let keys = KeyBus::new();
    let mut widget = ChatWidget::mount(client, RecordingSurface::default(), &keys);
    widget.open();
    widget.send("What is a PID controller?").await.unwrap();

    let state = widget.state();
    assert_eq!(state.messages.len(), 2);
    assert!(!state.is_loading);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn end_to_end_server_error_through_http_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "detail": "model unavailable" })))
        .mount(&server)
        .await;

    let client = Arc::new(ChatClient::new(ClientConfig::default().with_base_url(server.uri())).unwrap());
    let keys = KeyBus::new();
    let mut widget = ChatWidget::mount(client, RecordingSurface::default(), &keys);
    widget.open();
    widget.send("What is a PID controller?").await.unwrap();

    let state = widget.state();
    assert_eq!(state.error.as_deref(), Some("model unavailable"));
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].role, Role::User);
    assert!(!state.is_loading);
}
