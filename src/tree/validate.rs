use super::{Document, MacroDenylist, NodePath, children, node_type};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("root type must be 'doc', found {found:?}")]
    RootNotDoc { found: Option<String> },
    #[error("root is missing its 'content' field")]
    MissingContent,
    #[error("'content' at {path} must be an array")]
    ContentNotArray { path: NodePath },
    #[error("text node at {path} is missing its 'text' field")]
    TextMissing { path: NodePath },
    #[error("text node at {path} has a non-string 'text' field")]
    TextNotString { path: NodePath },
    #[error("macro node at {path} is missing its 'attrs' field")]
    MacroMissingAttrs { path: NodePath },
}

/// Checks the structural rules the editor relies on. An empty result means
/// the tree is safe to edit.
pub fn validate(doc: &Document, denylist: &MacroDenylist) -> Vec<ValidationIssue> {
    let root = doc.as_value();
    let mut issues = Vec::new();

    let root_type = node_type(root);
    if root_type != Some("doc") {
        issues.push(ValidationIssue::RootNotDoc {
            found: root_type.map(str::to_string),
        });
    }
    if root.get("content").is_none() {
        issues.push(ValidationIssue::MissingContent);
    }

    let mut path = Vec::new();
    validate_node(root, denylist, &mut path, &mut issues);
    issues
}

fn validate_node(
    node: &Value,
    denylist: &MacroDenylist,
    path: &mut Vec<usize>,
    issues: &mut Vec<ValidationIssue>,
) {
    if !node.is_object() {
        return;
    }
    let here = || NodePath::from_indices(path.clone());

    match node_type(node) {
        Some("text") => match node.get("text") {
            None => issues.push(ValidationIssue::TextMissing { path: here() }),
            Some(Value::String(_)) => {}
            Some(_) => issues.push(ValidationIssue::TextNotString { path: here() }),
        },
        Some(kind) if denylist.contains_type(kind) && node.get("attrs").is_none() => {
            issues.push(ValidationIssue::MacroMissingAttrs { path: here() });
        }
        _ => {}
    }

    match node.get("content") {
        None => {}
        Some(Value::Array(_)) => {
            if let Some(content) = children(node) {
                for (index, child) in content.iter().enumerate() {
                    path.push(index);
                    validate_node(child, denylist, path, issues);
                    path.pop();
                }
            }
        }
        Some(_) => issues.push(ValidationIssue::ContentNotArray { path: here() }),
    }
}
