use super::{Document, MacroDenylist, MacroMode, NodeKind, NodePath};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: NodePath,
    pub old_text: String,
    pub new_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("path {path} no longer resolves in the document")]
    PathNotFound { path: NodePath },
    #[error("node at {path} is not a text node")]
    NotTextNode { path: NodePath },
    #[error("text at {path} changed since extraction (expected {expected:?}, found {found:?})")]
    StaleText {
        path: NodePath,
        expected: String,
        found: String,
    },
    #[error("node at {path} is inside macro at {macro_path}")]
    InsideMacro { path: NodePath, macro_path: NodePath },
}

/// Returns a copy of `doc` with the text of each referenced node replaced.
///
/// Every record is checked before anything is written, so either all
/// changes land or the error for the first bad record is returned and the
/// input is left as it was.
pub fn apply_changes(
    doc: &Document,
    changes: &[ChangeRecord],
    denylist: &MacroDenylist,
    mode: MacroMode,
) -> Result<Document, PatchError> {
    for change in changes {
        check_change(doc, change, denylist, mode)?;
    }

    let mut patched = doc.clone();
    for change in changes {
        let node = patched
            .node_mut(&change.path)
            .ok_or_else(|| PatchError::PathNotFound {
                path: change.path.clone(),
            })?;
        node["text"] = Value::String(change.new_text.clone());
    }
    Ok(patched)
}

fn check_change(
    doc: &Document,
    change: &ChangeRecord,
    denylist: &MacroDenylist,
    mode: MacroMode,
) -> Result<(), PatchError> {
    let node = doc.node(&change.path).ok_or_else(|| PatchError::PathNotFound {
        path: change.path.clone(),
    })?;

    if !mode.includes_bodies() {
        if let Some(macro_path) = doc.enclosing_macro(&change.path, denylist) {
            return Err(PatchError::InsideMacro {
                path: change.path.clone(),
                macro_path,
            });
        }
    }

    let NodeKind::Text(current) = denylist.classify(node) else {
        return Err(PatchError::NotTextNode {
            path: change.path.clone(),
        });
    };
    if current != change.old_text {
        return Err(PatchError::StaleText {
            path: change.path.clone(),
            expected: change.old_text.clone(),
            found: current.to_string(),
        });
    }
    Ok(())
}
