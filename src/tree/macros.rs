//! Detection of macros whose bodies hold editable text.
//!
//! Used before extraction to tell the caller what Safe mode would leave out,
//! so macro bodies are only opened for editing after an explicit opt-in.

use super::{Document, MacroDenylist, NodeKind, NodePath, children};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

const PREVIEW_GRAPHEMES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroInfo {
    pub path: NodePath,
    pub node_type: String,
    pub identifier: String,
    pub label: String,
    pub preview: String,
    pub text_count: usize,
}

/// Lists the outermost macros that contain at least one non-blank text node.
pub fn detect_macros_with_content(doc: &Document, denylist: &MacroDenylist) -> Vec<MacroInfo> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    detect(doc.as_value(), denylist, &mut path, &mut out);
    out
}

fn detect(node: &Value, denylist: &MacroDenylist, path: &mut Vec<usize>, out: &mut Vec<MacroInfo>) {
    if let NodeKind::Macro {
        node_type,
        identifier,
    } = denylist.classify(node)
    {
        let text_count = count_text_nodes(node);
        if text_count > 0 {
            out.push(MacroInfo {
                path: NodePath::from_indices(path.clone()),
                node_type: node_type.to_string(),
                identifier: identifier.to_string(),
                label: macro_label(identifier),
                preview: preview(&all_text(node)),
                text_count,
            });
        }
        return;
    }

    if let Some(content) = children(node) {
        for (index, child) in content.iter().enumerate() {
            path.push(index);
            detect(child, denylist, path, out);
            path.pop();
        }
    }
}

/// Friendly name for a macro identifier, falling back to title case.
pub fn macro_label(identifier: &str) -> String {
    let known = match identifier {
        "expand" => Some("Expand Panel"),
        "panel" => Some("Panel"),
        "info" => Some("Info Panel"),
        "note" => Some("Note Panel"),
        "warning" => Some("Warning Panel"),
        "tip" => Some("Tip Panel"),
        "success" => Some("Success Panel"),
        "error" => Some("Error Panel"),
        _ => None,
    };
    if let Some(label) = known {
        return label.to_string();
    }
    let mut chars = identifier.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn count_text_nodes(node: &Value) -> usize {
    let own = match node.get("type").and_then(Value::as_str) {
        Some("text") => node
            .get("text")
            .and_then(Value::as_str)
            .is_some_and(|text| !text.trim().is_empty()) as usize,
        _ => 0,
    };
    own + children(node)
        .map(|content| content.iter().map(count_text_nodes).sum())
        .unwrap_or(0)
}

fn all_text(node: &Value) -> String {
    if node.get("type").and_then(Value::as_str) == Some("text") {
        return node
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
    }
    let Some(content) = children(node) else {
        return String::new();
    };
    content
        .iter()
        .map(all_text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn preview(text: &str) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes.by_ref().take(PREVIEW_GRAPHEMES).collect();
    if graphemes.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detects_only_text_bearing_macros() {
        let doc = Document::from_value(json!({
            "type": "doc",
            "content": [
                {"type": "extension", "attrs": {"extensionKey": "toc"}},
                {"type": "panel", "attrs": {"panelType": "warning"}, "content": [
                    {"type": "paragraph", "content": [
                        {"type": "text", "text": "Mind"},
                        {"type": "text", "text": "the gap"}
                    ]}
                ]},
                {"type": "paragraph", "content": [{"type": "text", "text": "plain"}]}
            ]
        }))
        .unwrap();

        let macros = detect_macros_with_content(&doc, &MacroDenylist::default());
        assert_eq!(macros.len(), 1);
        let info = &macros[0];
        assert_eq!(info.path, NodePath::from_indices(vec![1]));
        assert_eq!(info.identifier, "warning");
        assert_eq!(info.label, "Warning Panel");
        assert_eq!(info.preview, "Mind the gap");
        assert_eq!(info.text_count, 2);
    }

    #[test]
    fn test_preview_truncates_on_grapheme_boundary() {
        let long = "é".repeat(60);
        let short = preview(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.trim_end_matches("...").graphemes(true).count(), 50);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_macro_label_fallback() {
        assert_eq!(macro_label("info"), "Info Panel");
        assert_eq!(macro_label("jira"), "Jira");
        assert_eq!(macro_label(""), "");
    }
}
