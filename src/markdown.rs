//! Constrained markdown: bold, italic, inline code and fenced code blocks.
//!
//! DESIGN
//! ======
//! Two passes. The first splits the input on triple-backtick fences so code
//! block bodies are isolated before anything else looks at them. The second
//! walks the remaining prose line by line and peels off inline spans in a
//! fixed order: inline code, then bold, then italic. A span captured by an
//! earlier rule is opaque to later ones: its content is never re-scanned,
//! but a later rule may wrap it, so `*see **this** now*` nests.
//!
//! The output is a typed [`Node`] sequence. Literal text stays in
//! [`Node::Text`] and is never mixed with formatting, so a surface can escape
//! it however it needs to.

const FENCE: &str = "```";

/// A display node produced by [`render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal text, passed through verbatim.
    Text(String),
    /// `**bold**`; may contain inline code.
    Strong(Vec<Node>),
    /// `*italic*`; may contain bold or inline code.
    Emphasis(Vec<Node>),
    /// `` `code` ``
    Code(String),
    /// A fenced block; the body is never inline-processed.
    CodeBlock { language: Option<String>, code: String },
    /// A line break inside prose.
    LineBreak,
}

impl Node {
    /// `true` for nodes that carry formatting rather than plain text.
    #[must_use]
    pub fn is_formatted(&self) -> bool {
        !matches!(self, Self::Text(_) | Self::LineBreak)
    }
}

// =============================================================================
// FENCE PASS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Prose(&'a str),
    /// Body between an opening and closing fence, fences excluded.
    Fence(&'a str),
}

/// Split on complete ```` ``` ```` pairs. An unclosed fence stays prose.
fn split_fences(input: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        let Some(close) = after_open.find(FENCE) else {
            break;
        };
        if open > 0 {
            segments.push(Segment::Prose(&rest[..open]));
        }
        segments.push(Segment::Fence(&after_open[..close]));
        rest = &after_open[close + FENCE.len()..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Prose(rest));
    }
    segments
}

/// Strip an optional language tag: a first line made only of word characters.
fn code_block(body: &str) -> Node {
    if let Some((first, remainder)) = body.split_once('\n') {
        let is_tag = !first.is_empty() && first.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if is_tag {
            return Node::CodeBlock { language: Some(first.to_owned()), code: remainder.to_owned() };
        }
    }
    Node::CodeBlock { language: None, code: body.to_owned() }
}

// =============================================================================
// INLINE PASS
// =============================================================================

/// One position in a line during the inline pass: a literal character, or a
/// span an earlier rule already matched.
#[derive(Debug, Clone)]
enum Unit {
    Char(char),
    Span(Node),
}

impl Unit {
    fn is(&self, marker: char) -> bool {
        matches!(self, Self::Char(c) if *c == marker)
    }
}

/// Find the first `delim` + run-without-`marker` + `delim` span.
///
/// Mirrors the leftmost match of `D([^m]+)D` where `D` is `delim_len`
/// markers. Matched spans count as ordinary non-marker units, so a later
/// rule can wrap them.
fn find_span(units: &[Unit], delim_len: usize, marker: char) -> Option<(usize, usize)> {
    let is_delim = |at: usize| at + delim_len <= units.len() && units[at..at + delim_len].iter().all(|u| u.is(marker));
    for start in 0..units.len() {
        if !is_delim(start) {
            continue;
        }
        let inner_start = start + delim_len;
        let inner_end = units[inner_start..]
            .iter()
            .position(|u| u.is(marker))
            .map_or(units.len(), |p| inner_start + p);
        if inner_end > inner_start && is_delim(inner_end) {
            return Some((start, inner_end + delim_len));
        }
    }
    None
}

/// Merge runs of characters back into text nodes.
fn to_nodes(units: &[Unit]) -> Vec<Node> {
    let mut out = Vec::new();
    let mut text = String::new();
    for unit in units {
        match unit {
            Unit::Char(c) => text.push(*c),
            Unit::Span(node) => {
                if !text.is_empty() {
                    out.push(Node::Text(std::mem::take(&mut text)));
                }
                out.push(node.clone());
            }
        }
    }
    if !text.is_empty() {
        out.push(Node::Text(text));
    }
    out
}

type Wrap = fn(Vec<Node>) -> Node;

fn code(children: Vec<Node>) -> Node {
    Node::Code(plain_text(&children))
}

/// Inline rules in application order: `(delimiter length, marker, wrap)`.
const INLINE_RULES: [(usize, char, Wrap); 3] = [
    (1, '`', code),
    (2, '*', Node::Strong),
    (1, '*', Node::Emphasis),
];

fn apply_rule(units: Vec<Unit>, delim_len: usize, marker: char, wrap: Wrap) -> Vec<Unit> {
    let mut out = Vec::with_capacity(units.len());
    let mut rest = units.as_slice();
    while let Some((start, end)) = find_span(rest, delim_len, marker) {
        out.extend_from_slice(&rest[..start]);
        out.push(Unit::Span(wrap(to_nodes(&rest[start + delim_len..end - delim_len]))));
        rest = &rest[end..];
    }
    out.extend_from_slice(rest);
    out
}

fn render_inline(line: &str, out: &mut Vec<Node>) {
    let mut units: Vec<Unit> = line.chars().map(Unit::Char).collect();
    for (delim_len, marker, wrap) in INLINE_RULES {
        units = apply_rule(units, delim_len, marker, wrap);
    }
    out.extend(to_nodes(&units));
}

fn render_prose(prose: &str, out: &mut Vec<Node>) {
    for (idx, line) in prose.split('\n').enumerate() {
        if idx > 0 {
            out.push(Node::LineBreak);
        }
        render_inline(line, out);
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Render a response string into display nodes.
///
/// Fences are located up front; each segment is expanded into nodes only when
/// the iterator reaches it.
pub fn render(input: &str) -> impl Iterator<Item = Node> + '_ {
    split_fences(input).into_iter().flat_map(|segment| match segment {
        Segment::Fence(body) => vec![code_block(body)],
        Segment::Prose(prose) => {
            let mut out = Vec::new();
            render_prose(prose, &mut out);
            out
        }
    })
}

/// Concatenate the literal content of `nodes` with no styling.
#[must_use]
pub fn plain_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(t) | Node::Code(t) => out.push_str(t),
            Node::Strong(children) | Node::Emphasis(children) => out.push_str(&plain_text(children)),
            Node::CodeBlock { code, .. } => out.push_str(code),
            Node::LineBreak => out.push('\n'),
        }
    }
    out
}

#[cfg(test)]
#[path = "markdown_test.rs"]
mod markdown_test;
