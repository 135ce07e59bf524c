//! adf-roundtrip: edit the text of Atlassian Document Format trees as plain
//! text without losing anything else.
//!
//! A document is rendered to Markdown-like text, the text is edited by a
//! person or a tool, and the edits are mapped back onto the original text
//! nodes. Only `text` fields change; marks, attributes, unknown node types
//! and macros survive byte for byte. Writes go through an edit session that
//! backs the document up first and restores it if the write fails.
//!
//! - **Tree model** - index-path addressing, node classification, validation
//! - **Renderer** - editable text plus the fragment map back to text nodes
//! - **Change detection** - word-overlap alignment of edited lines
//! - **Patcher** - all-or-nothing text replacement by path
//! - **Sessions** - fetch, back up, edit, write, roll back
//!
//! # Quick Start
//!
//! ```rust
//! use adf_roundtrip::{
//!     Document, MacroDenylist, MacroMode, MatchConfig, apply_changes, detect_changes, render,
//! };
//!
//! let doc = Document::from_json(
//!     r#"{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"Ship it on Monday"}]}]}"#,
//! )?;
//! let denylist = MacroDenylist::default();
//!
//! let rendering = render(&doc, &denylist, MacroMode::Safe);
//! assert_eq!(rendering.text, "Ship it on Monday\n");
//!
//! let edited = rendering.text.replace("Monday", "Tuesday");
//! let found = detect_changes(&rendering.fragments, &edited, &MatchConfig::default());
//! let patched = apply_changes(&doc, &found.changes, &denylist, MacroMode::Safe)?;
//! assert_eq!(
//!     patched.as_value()["content"][0]["content"][0]["text"],
//!     "Ship it on Tuesday"
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Features
//!
//! - `storage` (default) - File-backed [`FsBackupStore`] and [`FsDocumentStore`]

// Document tree, extraction, patching and validation
pub mod tree;

// Tree to editable text
pub mod render;

// Edited text back to change records
pub mod diff;

// Pre-edit backups
pub mod backup;

// Document fetch/write
pub mod store;

pub mod config;

// Edit-session orchestration
pub mod session;

pub use tree::extract::{TextNodeRef, extract_text_nodes};
pub use tree::macros::{MacroInfo, detect_macros_with_content};
pub use tree::patch::{ChangeRecord, PatchError, apply_changes};
pub use tree::validate::{ValidationIssue, validate};
pub use tree::{Document, MacroDenylist, MacroMode, NodeKind, NodePath, TreeError};

pub use render::{Fragment, FragmentKind, Rendering, TextSpan, render};

pub use diff::{
    ChangeSet, MatchConfig, MatchWarning, Score, detect_changes, detect_text_node_changes,
    word_overlap,
};

pub use backup::{
    BackupError, BackupRecord, BackupStore, BackupTimestamp, DocumentMetadata, MemoryBackupStore,
};
#[cfg(feature = "storage")]
pub use backup::FsBackupStore;

pub use store::{DocumentStore, FetchedDocument, StoreError};
#[cfg(feature = "storage")]
pub use store::{FsDocumentStore, PageEnvelope};

pub use config::{ConfigError, RoundtripConfig};

pub use session::{
    EditOutcome, EditReport, EditSession, PreparedEdit, RestoredBackup, RollbackError,
    SessionError, SessionOptions, SessionState, rollback_document,
};
