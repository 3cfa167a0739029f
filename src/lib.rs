//! Conversational assistant core for a documentation site.
//!
//! A reader asks questions in a chat widget, optionally scoped to a passage
//! they have selected. Questions go to an answering service over HTTP along
//! with recent conversation history; replies come back with source links and
//! are rendered from a constrained markdown subset.
//!
//! The crate is host-agnostic: the document selection, keyboard and output
//! surface are traits and channels, so the same core drives a terminal REPL
//! or any other front end.

pub mod config;
pub mod markdown;
pub mod net;
pub mod selection;
pub mod state;
pub mod terminal;
pub mod widget;
