//! The edit session: fetch, back up, render, take edits, patch, write.
//!
//! A session runs strictly in order and owns its copy of the tree. The
//! backup is taken before anything else happens to the fetched document and
//! is what the store is restored to if the final write fails:
//!
//! ```text
//! Fetched -> Extracted -> Rendered -> AwaitingEdit -> Diffed
//!     -> NoChanges
//!     -> Patched -> WriteSucceeded
//!                -> WriteFailed -> RolledBack
//! ```
//!
//! [`EditSession::begin`] runs up to `AwaitingEdit` and hands back a
//! [`PreparedEdit`] holding the rendered text; [`PreparedEdit::apply`]
//! takes the edited text and finishes the session.

use crate::backup::{BackupError, BackupRecord, BackupStore, BackupTimestamp};
use crate::config::RoundtripConfig;
use crate::diff::{MatchWarning, detect_changes};
use crate::render::{Rendering, render};
use crate::store::{DocumentStore, FetchedDocument, StoreError};
use crate::tree::MacroMode;
use crate::tree::macros::{MacroInfo, detect_macros_with_content};
use crate::tree::patch::{ChangeRecord, PatchError, apply_changes};
use crate::tree::validate::{ValidationIssue, validate};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Fetched,
    Extracted,
    Rendered,
    AwaitingEdit,
    Diffed,
    NoChanges,
    Patched,
    WriteSucceeded,
    WriteFailed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Opens macro bodies for editing. Off unless the caller asks.
    pub include_macro_bodies: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("could not load backup: {0}")]
    Load(#[source] BackupError),
    #[error("could not restore backup {backup}: {source}")]
    Restore {
        backup: BackupTimestamp,
        #[source]
        source: StoreError,
    },
    #[error("document {document_id} does not match backup {backup} after restore")]
    Mismatch {
        document_id: String,
        backup: BackupTimestamp,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to fetch document {document_id}: {source}")]
    Fetch {
        document_id: String,
        #[source]
        source: StoreError,
    },
    #[error("document {document_id} is not valid ADF: {}", format_issues(.issues))]
    InvalidDocument {
        document_id: String,
        issues: Vec<ValidationIssue>,
    },
    #[error("failed to back up document {document_id}: {source}")]
    Backup {
        document_id: String,
        #[source]
        source: BackupError,
    },
    #[error("failed to patch document {document_id}: {source}")]
    Patch {
        document_id: String,
        #[source]
        source: PatchError,
    },
    #[error("write of document {document_id} failed and was rolled back to backup {backup}: {source}")]
    WriteFailed {
        document_id: String,
        backup: BackupTimestamp,
        /// The restored document was read back and matched the backup.
        verified: bool,
        #[source]
        source: StoreError,
    },
    #[error(
        "write of document {document_id} failed ({write_error}) and rollback to backup {backup} also failed: {cause}"
    )]
    RollbackFailed {
        document_id: String,
        backup: BackupTimestamp,
        write_error: StoreError,
        #[source]
        cause: RollbackError,
    },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EditOutcome {
    NoChanges,
    Written { new_version: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct EditReport {
    pub session_id: Uuid,
    pub document_id: String,
    pub outcome: EditOutcome,
    pub changes: Vec<ChangeRecord>,
    pub warnings: Vec<MatchWarning>,
    pub backup: BackupTimestamp,
    pub macros: Vec<MacroInfo>,
    pub mode: MacroMode,
    pub states: Vec<SessionState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoredBackup {
    pub document_id: String,
    pub backup: BackupTimestamp,
    pub version: u64,
    pub verified: bool,
}

pub struct EditSession<'a> {
    store: &'a dyn DocumentStore,
    backups: &'a dyn BackupStore,
    config: &'a RoundtripConfig,
}

impl<'a> EditSession<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        backups: &'a dyn BackupStore,
        config: &'a RoundtripConfig,
    ) -> Self {
        Self {
            store,
            backups,
            config,
        }
    }

    /// Fetches, validates and backs up the document, then renders it for
    /// editing.
    pub fn begin(
        &self,
        document_id: &str,
        options: SessionOptions,
    ) -> Result<PreparedEdit<'a>, SessionError> {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("edit_session", %session_id, document_id);
        let _guard = span.enter();
        let mut states = Vec::new();

        let fetched = self
            .store
            .fetch(document_id)
            .map_err(|source| SessionError::Fetch {
                document_id: document_id.to_string(),
                source,
            })?;
        transition(&mut states, SessionState::Fetched);

        let issues = validate(&fetched.tree, &self.config.denylist);
        if !issues.is_empty() {
            tracing::warn!(issues = issues.len(), "document failed validation");
            return Err(SessionError::InvalidDocument {
                document_id: document_id.to_string(),
                issues,
            });
        }

        let backup = self
            .backups
            .create_backup(
                document_id,
                &fetched.tree,
                fetched.version,
                &fetched.metadata,
                self.config.retention_limit,
            )
            .map_err(|source| SessionError::Backup {
                document_id: document_id.to_string(),
                source,
            })?;

        let macros = detect_macros_with_content(&fetched.tree, &self.config.denylist);
        let mode = if options.include_macro_bodies || !self.config.safe_mode {
            MacroMode::IncludeBodies
        } else {
            MacroMode::Safe
        };
        if !macros.is_empty() {
            tracing::info!(
                count = macros.len(),
                mode = ?mode,
                "document has macros with editable content"
            );
        }
        transition(&mut states, SessionState::Extracted);

        let rendering = render(&fetched.tree, &self.config.denylist, mode);
        transition(&mut states, SessionState::Rendered);
        transition(&mut states, SessionState::AwaitingEdit);

        Ok(PreparedEdit {
            store: self.store,
            backups: self.backups,
            config: self.config,
            session_id,
            fetched,
            backup,
            macros,
            mode,
            rendering,
            states,
        })
    }

    /// Runs a whole session with `editor` producing the edited text.
    pub fn run(
        &self,
        document_id: &str,
        options: SessionOptions,
        editor: impl FnOnce(&str) -> String,
    ) -> Result<EditReport, SessionError> {
        let prepared = self.begin(document_id, options)?;
        let edited = editor(prepared.rendered_text());
        prepared.apply(&edited)
    }
}

/// A session paused at `AwaitingEdit`.
pub struct PreparedEdit<'a> {
    store: &'a dyn DocumentStore,
    backups: &'a dyn BackupStore,
    config: &'a RoundtripConfig,
    session_id: Uuid,
    fetched: FetchedDocument,
    backup: BackupTimestamp,
    macros: Vec<MacroInfo>,
    mode: MacroMode,
    rendering: Rendering,
    states: Vec<SessionState>,
}

impl<'a> PreparedEdit<'a> {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn document(&self) -> &FetchedDocument {
        &self.fetched
    }

    /// The text to hand to the editor.
    pub fn rendered_text(&self) -> &str {
        &self.rendering.text
    }

    pub fn rendering(&self) -> &Rendering {
        &self.rendering
    }

    /// Macros with text content, whether or not their bodies are editable.
    pub fn macros(&self) -> &[MacroInfo] {
        &self.macros
    }

    pub fn mode(&self) -> MacroMode {
        self.mode
    }

    pub fn backup(&self) -> BackupTimestamp {
        self.backup
    }

    pub fn states(&self) -> &[SessionState] {
        &self.states
    }

    pub fn apply(self, edited: &str) -> Result<EditReport, SessionError> {
        let span = tracing::info_span!(
            "edit_session",
            session_id = %self.session_id,
            document_id = %self.fetched.document_id
        );
        let _guard = span.enter();

        let PreparedEdit {
            store,
            backups,
            config,
            session_id,
            fetched,
            backup,
            macros,
            mode,
            rendering,
            mut states,
        } = self;
        let document_id = fetched.document_id.clone();

        let change_set = detect_changes(&rendering.fragments, edited, &config.matching);
        transition(&mut states, SessionState::Diffed);
        for warning in &change_set.warnings {
            tracing::warn!(?warning, "edit could not be placed");
        }

        let report = |outcome, states| EditReport {
            session_id,
            document_id: document_id.clone(),
            outcome,
            changes: change_set.changes.clone(),
            warnings: change_set.warnings.clone(),
            backup,
            macros: macros.clone(),
            mode,
            states,
        };

        if change_set.is_empty() {
            transition(&mut states, SessionState::NoChanges);
            return Ok(report(EditOutcome::NoChanges, states));
        }

        let patched = apply_changes(&fetched.tree, &change_set.changes, &config.denylist, mode)
            .map_err(|source| SessionError::Patch {
                document_id: document_id.clone(),
                source,
            })?;
        transition(&mut states, SessionState::Patched);
        tracing::info!(changes = change_set.changes.len(), "document patched");

        match store.write(&document_id, fetched.version, &patched) {
            Ok(new_version) => {
                transition(&mut states, SessionState::WriteSucceeded);
                tracing::info!(new_version, "document written");
                Ok(report(EditOutcome::Written { new_version }, states))
            }
            Err(write_error) => {
                transition(&mut states, SessionState::WriteFailed);
                tracing::error!(error = %write_error, %backup, "write failed, rolling back");
                match restore_backup(store, backups, &document_id, backup) {
                    Ok(restored) => {
                        transition(&mut states, SessionState::RolledBack);
                        tracing::info!(verified = restored.verified, "rolled back");
                        Err(SessionError::WriteFailed {
                            document_id,
                            backup,
                            verified: restored.verified,
                            source: write_error,
                        })
                    }
                    Err(cause) => {
                        tracing::error!(error = %cause, "rollback failed");
                        Err(SessionError::RollbackFailed {
                            document_id,
                            backup,
                            write_error,
                            cause,
                        })
                    }
                }
            }
        }
    }
}

fn transition(states: &mut Vec<SessionState>, state: SessionState) {
    tracing::debug!(?state, "session state");
    states.push(state);
}

/// Restores a stored backup, the latest one unless `timestamp` is given.
pub fn rollback_document(
    store: &dyn DocumentStore,
    backups: &dyn BackupStore,
    document_id: &str,
    timestamp: Option<BackupTimestamp>,
) -> Result<RestoredBackup, RollbackError> {
    let timestamp = match timestamp {
        Some(timestamp) => timestamp,
        None => backups
            .list(document_id)
            .map_err(RollbackError::Load)?
            .pop()
            .ok_or_else(|| {
                RollbackError::Load(BackupError::NotFound {
                    document_id: document_id.to_string(),
                    timestamp: None,
                })
            })?,
    };
    restore_backup(store, backups, document_id, timestamp)
}

fn restore_backup(
    store: &dyn DocumentStore,
    backups: &dyn BackupStore,
    document_id: &str,
    timestamp: BackupTimestamp,
) -> Result<RestoredBackup, RollbackError> {
    let record = backups
        .load(document_id, timestamp)
        .map_err(RollbackError::Load)?;
    store
        .restore(document_id, &record)
        .map_err(|source| RollbackError::Restore {
            backup: timestamp,
            source,
        })?;
    let verified = read_back_matches(store, &record)?;
    tracing::info!(document_id, backup = %timestamp, verified, "backup restored");
    Ok(RestoredBackup {
        document_id: document_id.to_string(),
        backup: timestamp,
        version: record.version,
        verified,
    })
}

/// `Ok(false)` when the store cannot be read back; a readable document that
/// differs from the backup is an error.
fn read_back_matches(
    store: &dyn DocumentStore,
    record: &BackupRecord,
) -> Result<bool, RollbackError> {
    match store.fetch(&record.document_id) {
        Ok(current) if current.tree == record.tree => Ok(true),
        Ok(_) => Err(RollbackError::Mismatch {
            document_id: record.document_id.clone(),
            backup: record.timestamp,
        }),
        Err(err) => {
            tracing::warn!(error = %err, "could not read back restored document");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{DocumentMetadata, MemoryBackupStore};
    use crate::tree::Document;
    use serde_json::{Value, json};
    use std::cell::RefCell;

    struct OneDocStore {
        doc: RefCell<FetchedDocument>,
        fail_writes: bool,
        writes: RefCell<u32>,
    }

    impl OneDocStore {
        fn new(body: Value, fail_writes: bool) -> Self {
            Self {
                doc: RefCell::new(FetchedDocument {
                    document_id: "p1".to_string(),
                    version: 4,
                    metadata: DocumentMetadata::default(),
                    tree: Document::from_value(body).unwrap(),
                }),
                fail_writes,
                writes: RefCell::new(0),
            }
        }
    }

    impl DocumentStore for OneDocStore {
        fn fetch(&self, _document_id: &str) -> Result<FetchedDocument, StoreError> {
            Ok(self.doc.borrow().clone())
        }

        fn write(&self, document_id: &str, _base: u64, tree: &Document) -> Result<u64, StoreError> {
            *self.writes.borrow_mut() += 1;
            if self.fail_writes {
                return Err(StoreError::Rejected {
                    document_id: document_id.to_string(),
                    reason: "read only".to_string(),
                });
            }
            let mut doc = self.doc.borrow_mut();
            doc.version += 1;
            doc.tree = tree.clone();
            Ok(doc.version)
        }

        fn restore(&self, _document_id: &str, backup: &BackupRecord) -> Result<(), StoreError> {
            self.doc.borrow_mut().tree = backup.tree.clone();
            Ok(())
        }
    }

    fn page() -> Value {
        json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": "The launch is on Monday"}]},
                {"type": "panel", "attrs": {"panelType": "info"}, "content": [
                    {"type": "paragraph", "content": [{"type": "text", "text": "Internal only"}]}
                ]}
            ]
        })
    }

    #[test]
    fn test_begin_backs_up_and_reports_macros() {
        let store = OneDocStore::new(page(), false);
        let backups = MemoryBackupStore::new();
        let config = RoundtripConfig::default();
        let session = EditSession::new(&store, &backups, &config);

        let prepared = session.begin("p1", SessionOptions::default()).unwrap();
        assert_eq!(backups.list("p1").unwrap(), vec![prepared.backup()]);
        assert_eq!(prepared.macros().len(), 1);
        assert_eq!(prepared.mode(), MacroMode::Safe);
        assert!(!prepared.rendered_text().contains("Internal only"));
        assert_eq!(
            prepared.states(),
            &[
                SessionState::Fetched,
                SessionState::Extracted,
                SessionState::Rendered,
                SessionState::AwaitingEdit
            ]
        );
    }

    #[test]
    fn test_opt_in_renders_macro_bodies() {
        let store = OneDocStore::new(page(), false);
        let backups = MemoryBackupStore::new();
        let config = RoundtripConfig::default();
        let session = EditSession::new(&store, &backups, &config);

        let options = SessionOptions {
            include_macro_bodies: true,
        };
        let prepared = session.begin("p1", options).unwrap();
        assert!(prepared.rendered_text().contains("Internal only"));
    }

    #[test]
    fn test_edit_is_written() {
        let store = OneDocStore::new(page(), false);
        let backups = MemoryBackupStore::new();
        let config = RoundtripConfig::default();
        let session = EditSession::new(&store, &backups, &config);

        let report = session
            .run("p1", SessionOptions::default(), |text| {
                text.replace("Monday", "Tuesday")
            })
            .unwrap();
        assert_eq!(report.outcome, EditOutcome::Written { new_version: 5 });
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].new_text, "The launch is on Tuesday");
        assert_eq!(report.states.last(), Some(&SessionState::WriteSucceeded));
        let stored = store.doc.borrow();
        assert_eq!(
            stored.tree.as_value()["content"][0]["content"][0]["text"],
            "The launch is on Tuesday"
        );
        assert_eq!(
            stored.tree.as_value()["content"][1]["content"][0]["content"][0]["text"],
            "Internal only"
        );
    }

    #[test]
    fn test_invalid_document_is_not_backed_up() {
        let store = OneDocStore::new(json!({"type": "doc", "content": {}}), false);
        let backups = MemoryBackupStore::new();
        let config = RoundtripConfig::default();
        let session = EditSession::new(&store, &backups, &config);

        let err = session
            .begin("p1", SessionOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::InvalidDocument { .. }));
        assert!(backups.list("p1").unwrap().is_empty());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let store = OneDocStore::new(page(), true);
        let backups = MemoryBackupStore::new();
        let config = RoundtripConfig::default();
        let session = EditSession::new(&store, &backups, &config);

        let err = session
            .run("p1", SessionOptions::default(), |text| {
                text.replace("Monday", "Friday")
            })
            .unwrap_err();
        match err {
            SessionError::WriteFailed {
                verified, source, ..
            } => {
                assert!(verified);
                assert!(matches!(source, StoreError::Rejected { .. }));
            }
            other => panic!("Expected write failure, got {other:?}"),
        }
        assert_eq!(*store.writes.borrow(), 1);
    }

    #[test]
    fn test_manual_rollback_without_backups() {
        let store = OneDocStore::new(page(), false);
        let backups = MemoryBackupStore::new();
        let err = rollback_document(&store, &backups, "p1", None).unwrap_err();
        assert!(matches!(
            err,
            RollbackError::Load(BackupError::NotFound { .. })
        ));
    }
}
