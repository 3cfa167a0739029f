//! Line-oriented [`Surface`] for terminals.
//!
//! A terminal is append-only, so rendering is a diff against what has
//! already been printed: new messages, banner changes and visibility flips
//! are written once each. Messages that land while the widget is closed are
//! held back and printed on the next open.
//!
//! All literal text is stripped of control characters before it is written,
//! so reply content can never inject escape sequences.

use std::borrow::Cow;
use std::io::{self, Write};

use tracing::warn;
use uuid::Uuid;

use crate::markdown::{self, Node};
use crate::state::{ConversationState, Message, Role};
use crate::widget::Surface;

/// Characters of the selected passage shown in the context line.
pub const SELECTION_PREVIEW_CHARS: usize = 200;

pub const WELCOME_TITLE: &str = "Welcome to the docs assistant";
pub const WELCOME_BODY: &str = "Ask me anything about the documentation. Select a passage first to ask about it.";

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const ITALIC: &str = "\x1b[3m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// What has already been written.
#[derive(Debug, Default)]
struct Printed {
    is_open: bool,
    messages: usize,
    first_id: Option<Uuid>,
    is_loading: bool,
    error: Option<String>,
    selected_text: Option<String>,
    welcomed: bool,
}

pub struct TerminalSurface<W: Write> {
    out: W,
    color: bool,
    printed: Printed,
}

impl<W: Write> TerminalSurface<W> {
    /// Plain output, no ANSI styling.
    pub fn new(out: W) -> Self {
        Self { out, color: false, printed: Printed::default() }
    }

    #[must_use]
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.color { format!("{style}{text}{RESET}") } else { text.to_owned() }
    }

    fn draw(&mut self, state: &ConversationState) -> io::Result<()> {
        if state.is_open != self.printed.is_open {
            let line = if state.is_open { "-- chat opened --" } else { "-- chat closed --" };
            writeln!(self.out, "{}", self.styled(DIM, line))?;
            self.printed.is_open = state.is_open;
        }

        let first_id = state.messages.first().map(|m| m.id);
        if state.messages.len() < self.printed.messages || (self.printed.messages > 0 && first_id != self.printed.first_id) {
            writeln!(self.out, "{}", self.styled(DIM, "(conversation cleared)"))?;
            self.printed.messages = 0;
            self.printed.welcomed = false;
        }
        self.printed.first_id = first_id;

        if !state.is_open {
            return Ok(());
        }

        if state.messages.is_empty() && !state.is_loading {
            if !self.printed.welcomed {
                writeln!(self.out, "{}", self.styled(BOLD, WELCOME_TITLE))?;
                writeln!(self.out, "{WELCOME_BODY}")?;
                self.printed.welcomed = true;
            }
        } else {
            self.printed.welcomed = false;
        }

        if state.selected_text != self.printed.selected_text {
            match &state.selected_text {
                Some(text) => {
                    let preview = sanitize(&selection_preview(text)).into_owned();
                    writeln!(self.out, "{} \"{preview}\"", self.styled(DIM, "Selected text:"))?;
                }
                None => writeln!(self.out, "{}", self.styled(DIM, "(selection cleared)"))?,
            }
            self.printed.selected_text.clone_from(&state.selected_text);
        }

        for message in &state.messages[self.printed.messages..] {
            let block = self.format_message(message);
            self.out.write_all(block.as_bytes())?;
        }
        self.printed.messages = state.messages.len();

        if state.is_loading && !self.printed.is_loading {
            writeln!(self.out, "{}", self.styled(DIM, "Thinking..."))?;
        }
        self.printed.is_loading = state.is_loading;

        if state.error != self.printed.error {
            if let Some(error) = &state.error {
                let text = sanitize(error);
                writeln!(self.out, "{} {text}  {}", self.styled(RED, "Error:"), self.styled(DIM, "(/dismiss to hide)"))?;
            }
            self.printed.error.clone_from(&state.error);
        }
        Ok(())
    }

    fn format_message(&self, message: &Message) -> String {
        let mut block = String::new();
        match message.role {
            Role::User => {
                block.push_str(&self.styled(BOLD, "You: "));
                block.push_str(&sanitize(&message.content));
                block.push('\n');
            }
            Role::Assistant => {
                block.push_str(&self.styled(BOLD, "Assistant:"));
                block.push('\n');
                let nodes: Vec<Node> = markdown::render(&message.content).collect();
                block.push_str(&self.format_nodes(&nodes));
                if !block.ends_with('\n') {
                    block.push('\n');
                }
                if !message.sources.is_empty() {
                    block.push_str(&self.styled(DIM, "Sources"));
                    block.push('\n');
                    for source in &message.sources {
                        block.push_str(&format!("  {} -> {}\n", sanitize(&source.title), sanitize(&source.path)));
                    }
                }
            }
        }
        block
    }

    /// Format markdown nodes for the terminal. Without color, formatting
    /// markers are dropped and only the text remains.
    #[must_use]
    pub fn format_nodes(&self, nodes: &[Node]) -> String {
        let mut out = String::new();
        self.format_into(nodes, &mut Vec::new(), &mut out);
        out
    }

    /// `active` holds the styles of enclosing spans; they are re-applied
    /// after a nested span resets.
    fn format_into(&self, nodes: &[Node], active: &mut Vec<&'static str>, out: &mut String) {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(&sanitize(text)),
                Node::Strong(children) => self.format_span(BOLD, children, active, out),
                Node::Emphasis(children) => self.format_span(ITALIC, children, active, out),
                Node::Code(text) => self.format_span(CYAN, &[Node::Text(text.clone())], active, out),
                Node::CodeBlock { code, .. } => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                    for line in code.trim_end_matches('\n').lines() {
                        out.push_str("    ");
                        out.push_str(&self.styled(CYAN, &sanitize(line)));
                        out.push('\n');
                    }
                }
                Node::LineBreak => out.push('\n'),
            }
        }
    }

    fn format_span(&self, style: &'static str, children: &[Node], active: &mut Vec<&'static str>, out: &mut String) {
        if !self.color {
            self.format_into(children, active, out);
            return;
        }
        out.push_str(style);
        active.push(style);
        self.format_into(children, active, out);
        active.pop();
        out.push_str(RESET);
        out.push_str(&active.concat());
    }
}

impl<W: Write> Surface for TerminalSurface<W> {
    fn render(&mut self, state: &ConversationState) {
        if let Err(e) = self.draw(state) {
            warn!(error = %e, "terminal render failed");
        }
    }

    fn scroll_to_latest(&mut self, _state: &ConversationState) {
        if let Err(e) = self.out.flush() {
            warn!(error = %e, "terminal flush failed");
        }
    }
}

/// Shorten a selection for display: the first
/// [`SELECTION_PREVIEW_CHARS`] characters followed by `...`.
#[must_use]
pub fn selection_preview(text: &str) -> Cow<'_, str> {
    match text.char_indices().nth(SELECTION_PREVIEW_CHARS) {
        Some((byte_idx, _)) => Cow::Owned(format!("{}...", &text[..byte_idx])),
        None => Cow::Borrowed(text),
    }
}

/// Drop control characters other than newline and tab.
#[must_use]
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if text.chars().any(is_stripped) {
        Cow::Owned(text.chars().filter(|c| !is_stripped(*c)).collect())
    } else {
        Cow::Borrowed(text)
    }
}

fn is_stripped(c: char) -> bool {
    c.is_control() && c != '\n' && c != '\t'
}

#[cfg(test)]
#[path = "terminal_test.rs"]
mod terminal_test;
