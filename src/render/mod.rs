//! Renders a document tree as flat, editable text.
//!
//! Every text-bearing inline container (paragraph, heading, list item
//! paragraph, code block, ...) becomes one [`Fragment`]: the rendered line
//! prefix plus the concatenated text of its text nodes, with the byte span
//! of each node. The change detector aligns edited text against fragments,
//! then maps edits back to nodes through the spans.
//!
//! A fragment whose text holds line breaks takes one rendered line per
//! piece. A piece that would read back as markup (a blank line, a fence, a
//! placeholder or a rule) is written behind a single backslash, as is any
//! piece that already starts with one.
//!
//! Macro nodes render as an inert placeholder line. Placeholders are for
//! the reader only; they are never matched back to a node.

use crate::diff::segment::{fence_run, reads_as_markup};
use crate::tree::extract::TextNodeRef;
use crate::tree::{
    Document, MacroDenylist, MacroMode, NodeKind, NodePath, attr, children, node_type,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PLACEHOLDER_OPEN: &str = "<!--";
pub const RULE_LINE: &str = "---";
pub const FENCE: &str = "```";
pub const ESCAPE: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Line,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub path: NodePath,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// Markers written before the text on the first rendered line (`## `,
    /// `> - `). `None` when the fragment was not produced by the renderer.
    pub prefix: Option<String>,
    /// Markers written before every further line of a multi-line fragment.
    #[serde(default)]
    pub continuation: Option<String>,
    pub text: String,
    /// Byte ranges of `text` owned by text nodes. Text between spans stands
    /// in for inline nodes such as hard breaks and is read-only.
    pub spans: Vec<TextSpan>,
}

/// A piece of inline content, in document order.
#[derive(Debug, Clone, Copy)]
enum Inline<'v> {
    Text(usize, &'v str),
    Literal(&'v str),
}

impl Fragment {
    fn from_runs<'a>(
        kind: FragmentKind,
        prefix: Option<String>,
        continuation: Option<String>,
        runs: impl IntoIterator<Item = (Option<NodePath>, &'a str)>,
    ) -> Self {
        let mut text = String::new();
        let mut spans = Vec::new();
        for (path, run) in runs {
            let start = text.len();
            text.push_str(run);
            if let Some(path) = path {
                spans.push(TextSpan {
                    path,
                    start,
                    end: text.len(),
                });
            }
        }
        Self {
            kind,
            prefix,
            continuation,
            text,
            spans,
        }
    }

    /// Rendered lines occupied by the fragment. Code counts once: its body
    /// comes back as a single fenced candidate.
    pub fn line_count(&self) -> usize {
        match self.kind {
            FragmentKind::Line => self.text.split('\n').count(),
            FragmentKind::Code => 1,
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &NodePath> {
        self.spans.iter().map(|span| &span.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendering {
    pub text: String,
    pub fragments: Vec<Fragment>,
}

/// Groups consecutive text nodes sharing a parent into line fragments.
///
/// For callers that only hold extracted text nodes; a [`Rendering`] carries
/// richer fragments (prefixes, code blocks) for the same tree.
pub fn group_text_nodes(nodes: &[TextNodeRef]) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut index = 0;
    while index < nodes.len() {
        let parent = nodes[index].path.parent();
        let mut end = index + 1;
        while end < nodes.len() && nodes[end].path.parent() == parent {
            end += 1;
        }
        fragments.push(Fragment::from_runs(
            FragmentKind::Line,
            None,
            None,
            nodes[index..end]
                .iter()
                .map(|node| (Some(node.path.clone()), node.text.as_str())),
        ));
        index = end;
    }
    fragments
}

pub fn render(doc: &Document, denylist: &MacroDenylist, mode: MacroMode) -> Rendering {
    let mut renderer = Renderer {
        denylist,
        mode,
        lines: Vec::new(),
        fragments: Vec::new(),
        pending_marker: None,
    };
    let mut path = Vec::new();
    renderer.render_node(doc.as_value(), &Context::default(), &mut path);

    while renderer.lines.last().is_some_and(|line| line.is_empty()) {
        renderer.lines.pop();
    }
    let mut text = renderer.lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    Rendering {
        text,
        fragments: renderer.fragments,
    }
}

#[derive(Debug, Clone, Default)]
struct Context {
    quote_depth: usize,
    list_depth: usize,
    table_cell: bool,
}

struct Renderer<'a> {
    denylist: &'a MacroDenylist,
    mode: MacroMode,
    lines: Vec<String>,
    fragments: Vec<Fragment>,
    /// List marker waiting for the first line of the current list item.
    pending_marker: Option<String>,
}

impl Renderer<'_> {
    fn render_node(&mut self, node: &Value, ctx: &Context, path: &mut Vec<usize>) {
        match self.denylist.classify(node) {
            NodeKind::Macro { identifier, .. } => {
                self.lines
                    .push(format!("{PLACEHOLDER_OPEN} macro: {identifier} -->"));
                if self.mode.includes_bodies() {
                    self.render_children(node, ctx, path);
                }
            }
            NodeKind::Container { node_type } => self.render_container(node, node_type, ctx, path),
            NodeKind::Leaf { node_type: "rule" } => self.lines.push(RULE_LINE.to_string()),
            // Stray text outside an inline container renders as its own line.
            NodeKind::Text(text) if !text.is_empty() => {
                let prefix = self.line_prefix(ctx);
                let fragment = Fragment::from_runs(
                    FragmentKind::Line,
                    Some(prefix),
                    Some(block_prefix(ctx)),
                    [(Some(NodePath::from_indices(path.clone())), text)],
                );
                self.push_line_fragment(fragment);
            }
            _ => {}
        }
    }

    fn render_container(
        &mut self,
        node: &Value,
        node_type: &str,
        ctx: &Context,
        path: &mut Vec<usize>,
    ) {
        match node_type {
            "doc" => {
                let Some(content) = children(node) else {
                    return;
                };
                for (index, child) in content.iter().enumerate() {
                    path.push(index);
                    self.render_node(child, ctx, path);
                    path.pop();
                    if self.lines.last().is_some_and(|line| !line.is_empty()) {
                        self.lines.push(String::new());
                    }
                }
            }
            "bulletList" | "orderedList" => {
                let start = attr(node, "order").and_then(Value::as_u64).unwrap_or(1);
                let nested = Context {
                    list_depth: ctx.list_depth + 1,
                    ..ctx.clone()
                };
                let Some(items) = children(node) else {
                    return;
                };
                for (index, item) in items.iter().enumerate() {
                    self.pending_marker = Some(if node_type == "orderedList" {
                        format!("{}.", start + index as u64)
                    } else {
                        "-".to_string()
                    });
                    path.push(index);
                    self.render_node(item, &nested, path);
                    path.pop();
                    self.pending_marker = None;
                }
            }
            "blockquote" => {
                let nested = Context {
                    quote_depth: ctx.quote_depth + 1,
                    ..ctx.clone()
                };
                self.render_children(node, &nested, path);
            }
            "tableCell" | "tableHeader" => {
                let nested = Context {
                    table_cell: true,
                    ..ctx.clone()
                };
                self.render_children(node, &nested, path);
            }
            "codeBlock" => self.render_code_block(node, ctx, path),
            _ if has_text_child(node) => self.render_inline(node, node_type, ctx, path),
            _ => self.render_children(node, ctx, path),
        }
    }

    fn render_children(&mut self, node: &Value, ctx: &Context, path: &mut Vec<usize>) {
        let Some(content) = children(node) else {
            return;
        };
        for (index, child) in content.iter().enumerate() {
            path.push(index);
            self.render_node(child, ctx, path);
            path.pop();
        }
    }

    fn render_inline(
        &mut self,
        node: &Value,
        node_type: &str,
        ctx: &Context,
        path: &mut Vec<usize>,
    ) {
        let mut prefix = self.line_prefix(ctx);
        if node_type == "heading" {
            let level = attr(node, "level")
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .clamp(1, 6) as usize;
            prefix.push_str(&"#".repeat(level));
            prefix.push(' ');
        }

        let runs = self.inline_runs(node);
        let fragment = Fragment::from_runs(
            FragmentKind::Line,
            Some(prefix),
            Some(block_prefix(ctx)),
            runs.iter().map(|run| run.resolve(path.as_slice())),
        );
        if !fragment.spans.is_empty() {
            self.push_line_fragment(fragment);
        }

        // Inline macros and other non-text children follow the line.
        self.render_non_text_children(node, ctx, path);
    }

    fn render_non_text_children(&mut self, node: &Value, ctx: &Context, path: &mut Vec<usize>) {
        let Some(content) = children(node) else {
            return;
        };
        for (index, child) in content.iter().enumerate() {
            if matches!(self.denylist.classify(child), NodeKind::Text(_)) {
                continue;
            }
            path.push(index);
            self.render_node(child, ctx, path);
            path.pop();
        }
    }

    fn render_code_block(&mut self, node: &Value, ctx: &Context, path: &mut Vec<usize>) {
        // Fences never carry a list marker, or they would stop reading as fences.
        let prefix = block_prefix(ctx);
        let language = attr(node, "language")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let runs = self.inline_runs(node);
        let fragment = Fragment::from_runs(
            FragmentKind::Code,
            Some(prefix.clone()),
            Some(prefix.clone()),
            runs.iter()
                .filter(|run| matches!(run, Inline::Text(..)))
                .map(|run| run.resolve(path.as_slice())),
        );

        // The fence outgrows any backtick-only line in the body.
        let width = fragment
            .text
            .split('\n')
            .filter_map(fence_run)
            .map(|run| run + 1)
            .max()
            .unwrap_or(0)
            .max(FENCE.len());
        let fence = "`".repeat(width);

        self.lines.push(format!("{prefix}{fence}{language}"));
        if !fragment.spans.is_empty() {
            for line in fragment.text.split('\n') {
                self.lines.push(format!("{prefix}{line}"));
            }
            self.fragments.push(fragment);
        }
        self.lines.push(format!("{prefix}{fence}"));
        self.render_non_text_children(node, ctx, path);
    }

    /// Text children plus the inline nodes standing between them.
    fn inline_runs<'v>(&self, node: &'v Value) -> Vec<Inline<'v>> {
        let Some(content) = children(node) else {
            return Vec::new();
        };
        let mut runs = Vec::new();
        for (index, child) in content.iter().enumerate() {
            match self.denylist.classify(child) {
                NodeKind::Text(text) if !text.is_empty() => {
                    runs.push(Inline::Text(index, text));
                }
                NodeKind::Leaf { .. } => {
                    if let Some(literal) = inline_literal(child) {
                        runs.push(Inline::Literal(literal));
                    }
                }
                _ => {}
            }
        }

        // Literals only separate text runs; at either end they have nothing to join.
        while matches!(runs.last(), Some(Inline::Literal(_))) {
            runs.pop();
        }
        let leading = runs
            .iter()
            .take_while(|run| matches!(run, Inline::Literal(_)))
            .count();
        runs.drain(..leading);
        runs
    }

    fn push_line_fragment(&mut self, fragment: Fragment) {
        let prefix = fragment.prefix.as_deref().unwrap_or_default();
        let continuation = fragment.continuation.as_deref().unwrap_or(prefix);
        for (index, piece) in fragment.text.split('\n').enumerate() {
            let lead = if index == 0 { prefix } else { continuation };
            self.lines.push(escape_line(lead, piece));
        }
        self.fragments.push(fragment);
    }

    fn line_prefix(&mut self, ctx: &Context) -> String {
        let Some(marker) = self.pending_marker.take().filter(|_| ctx.list_depth > 0) else {
            return block_prefix(ctx);
        };
        let mut prefix = "> ".repeat(ctx.quote_depth);
        prefix.push_str(&"  ".repeat(ctx.list_depth - 1));
        prefix.push_str(&marker);
        prefix.push(' ');
        if ctx.table_cell {
            prefix.push_str("| ");
        }
        prefix
    }
}

impl<'v> Inline<'v> {
    fn resolve(&self, parent: &[usize]) -> (Option<NodePath>, &'v str) {
        match *self {
            Inline::Text(index, text) => {
                let mut child = parent.to_vec();
                child.push(index);
                (Some(NodePath::from_indices(child)), text)
            }
            Inline::Literal(text) => (None, text),
        }
    }
}

/// Read-only text for inline nodes that sit between text runs.
fn inline_literal(node: &Value) -> Option<&str> {
    match node_type(node)? {
        "hardBreak" => Some("\n"),
        "mention" => attr(node, "text").and_then(Value::as_str),
        "emoji" => attr(node, "text")
            .or_else(|| attr(node, "shortName"))
            .and_then(Value::as_str),
        _ => None,
    }
}

/// Writes one rendered line, escaping a piece that would not read back as text.
fn escape_line(lead: &str, piece: &str) -> String {
    let line = format!("{lead}{piece}");
    if piece.starts_with(ESCAPE) || reads_as_markup(piece) || reads_as_markup(&line) {
        format!("{lead}{ESCAPE}{piece}")
    } else {
        line
    }
}

fn block_prefix(ctx: &Context) -> String {
    let mut prefix = "> ".repeat(ctx.quote_depth);
    prefix.push_str(&"  ".repeat(ctx.list_depth));
    if ctx.table_cell {
        prefix.push_str("| ");
    }
    prefix
}

fn has_text_child(node: &Value) -> bool {
    children(node).is_some_and(|content| {
        content
            .iter()
            .any(|child| child.get("type").and_then(Value::as_str) == Some("text"))
    })
}
