use super::{Document, MacroDenylist, MacroMode, NodeKind, NodePath, children};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextNodeRef {
    pub path: NodePath,
    pub text: String,
}

/// Collects text nodes in reading order (depth-first, pre-order).
///
/// In [`MacroMode::Safe`] macro nodes are skipped together with their whole
/// subtree. Text nodes with empty text are left out since there is nothing
/// in them to edit.
pub fn extract_text_nodes(
    doc: &Document,
    denylist: &MacroDenylist,
    mode: MacroMode,
) -> Vec<TextNodeRef> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    collect_text_nodes(doc.as_value(), denylist, mode, &mut path, &mut out);
    out
}

fn collect_text_nodes(
    node: &Value,
    denylist: &MacroDenylist,
    mode: MacroMode,
    path: &mut Vec<usize>,
    out: &mut Vec<TextNodeRef>,
) {
    match denylist.classify(node) {
        NodeKind::Macro { .. } if !mode.includes_bodies() => return,
        NodeKind::Text(text) => {
            if !text.is_empty() {
                out.push(TextNodeRef {
                    path: NodePath::from_indices(path.clone()),
                    text: text.to_string(),
                });
            }
            return;
        }
        NodeKind::Opaque => return,
        _ => {}
    }

    if let Some(content) = children(node) {
        for (index, child) in content.iter().enumerate() {
            path.push(index);
            collect_text_nodes(child, denylist, mode, path, out);
            path.pop();
        }
    }
}
