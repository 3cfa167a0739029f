use super::*;
use crate::selection::MAX_SELECTION_CHARS;

// =============================================================
// Initial state
// =============================================================

#[test]
fn initial_state_is_closed_and_empty() {
    let store = ConversationStore::new();
    let state = store.state();
    assert!(!state.is_open);
    assert!(state.messages.is_empty());
    assert!(!state.is_loading);
    assert!(state.error.is_none());
    assert!(state.selected_text.is_none());
}

// =============================================================
// Visibility
// =============================================================

#[test]
fn toggle_twice_restores_visibility() {
    let mut store = ConversationStore::new();
    store.toggle_visibility();
    assert!(store.state().is_open);
    store.toggle_visibility();
    assert!(!store.state().is_open);
}

#[test]
fn open_is_idempotent() {
    let once = ConversationState::default().apply(Transition::Open);
    let twice = once.clone().apply(Transition::Open);
    assert_eq!(once, twice);
    assert!(twice.is_open);
}

#[test]
fn close_sets_closed_even_when_closed() {
    let state = ConversationState::default().apply(Transition::Close);
    assert!(!state.is_open);
}

// =============================================================
// Message log
// =============================================================

#[test]
fn append_assigns_unique_ids_in_insertion_order() {
    let mut store = ConversationStore::new();
    let first = store.append_message(NewMessage::user("one")).id;
    let second = store.append_message(NewMessage::assistant("two", Vec::new())).id;
    let third = store.append_message(NewMessage::user("three")).id;

    let contents: Vec<&str> = store
        .state()
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, ["one", "two", "three"]);
    assert_ne!(first, second);
    assert_ne!(second, third);
    assert_ne!(first, third);
}

#[test]
fn append_keeps_role_and_sources() {
    let mut store = ConversationStore::new();
    let source = Source { title: "PID".into(), path: "/docs/control/pid".into(), snippet: "A PID...".into() };
    let msg = store.append_message(NewMessage::assistant("answer", vec![source.clone()]));
    assert_eq!(msg.role, Role::Assistant);
    assert_eq!(msg.sources, vec![source]);
}

#[test]
fn other_transitions_never_touch_messages() {
    let mut store = ConversationStore::new();
    store.append_message(NewMessage::user("keep me"));
    let before = store.state().messages.clone();

    store.toggle_visibility();
    store.set_loading(true);
    store.set_error(Some("boom".into()));
    store.set_selected_text(Some("context".into()));
    store.close();

    assert_eq!(store.state().messages, before);
}

#[test]
fn clear_messages_empties_log_only() {
    let mut store = ConversationStore::new();
    store.open();
    store.set_selected_text(Some("ctx".into()));
    store.append_message(NewMessage::user("a"));
    store.clear_messages();

    let state = store.state();
    assert!(state.messages.is_empty());
    assert!(state.is_open);
    assert_eq!(state.selected_text.as_deref(), Some("ctx"));
}

// =============================================================
// Flags
// =============================================================

#[test]
fn error_is_replaced_not_accumulated() {
    let mut store = ConversationStore::new();
    store.set_error(Some("first".into()));
    store.set_error(Some("second".into()));
    assert_eq!(store.state().error.as_deref(), Some("second"));
    store.set_error(None);
    assert!(store.state().error.is_none());
}

#[test]
fn selected_text_is_truncated_to_limit() {
    let mut store = ConversationStore::new();
    store.set_selected_text(Some("x".repeat(MAX_SELECTION_CHARS + 50)));
    let stored = store.state().selected_text.as_deref().unwrap();
    assert_eq!(stored.chars().count(), MAX_SELECTION_CHARS);
}

#[test]
fn loading_flag_round_trips() {
    let mut store = ConversationStore::new();
    store.set_loading(true);
    assert!(store.state().is_loading);
    store.set_loading(false);
    assert!(!store.state().is_loading);
}
