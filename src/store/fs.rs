use super::{DocumentStore, FetchedDocument, StoreError};
use crate::backup::{BackupRecord, DocumentMetadata, is_safe_document_id};
use crate::tree::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// On-disk page: the ADF tree under `body`, plus version and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEnvelope {
    pub version: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    pub body: Value,
}

/// Pages stored as `<root>/<document_id>.json`.
#[derive(Debug)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn page_path(&self, document_id: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_document_id(document_id) {
            return Err(StoreError::Rejected {
                document_id: document_id.to_string(),
                reason: "document id is not a plain file name".to_string(),
            });
        }
        Ok(self.root.join(format!("{document_id}.json")))
    }

    fn read_envelope(&self, document_id: &str) -> Result<PageEnvelope, StoreError> {
        let path = self.page_path(document_id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                document_id: document_id.to_string(),
            }),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn write_envelope(&self, document_id: &str, envelope: &PageEnvelope) -> Result<(), StoreError> {
        let path = self.page_path(document_id)?;
        let temp_path = self.root.join(format!("{document_id}.json.tmp"));
        fs::write(&temp_path, serde_json::to_vec_pretty(envelope)?)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

impl DocumentStore for FsDocumentStore {
    fn fetch(&self, document_id: &str) -> Result<FetchedDocument, StoreError> {
        let envelope = self.read_envelope(document_id)?;
        let tree = Document::from_value(envelope.body).map_err(|err| StoreError::Rejected {
            document_id: document_id.to_string(),
            reason: err.to_string(),
        })?;
        Ok(FetchedDocument {
            document_id: document_id.to_string(),
            version: envelope.version,
            metadata: DocumentMetadata {
                title: envelope.title,
                space_id: envelope.space_id,
            },
            tree,
        })
    }

    fn write(
        &self,
        document_id: &str,
        base_version: u64,
        tree: &Document,
    ) -> Result<u64, StoreError> {
        let current = self.read_envelope(document_id)?;
        if current.version != base_version {
            return Err(StoreError::VersionConflict {
                document_id: document_id.to_string(),
                expected: base_version,
                found: current.version,
            });
        }
        let version = current.version + 1;
        self.write_envelope(
            document_id,
            &PageEnvelope {
                version,
                body: tree.as_value().clone(),
                ..current
            },
        )?;
        tracing::debug!(document_id, version, "page written");
        Ok(version)
    }

    fn restore(&self, document_id: &str, backup: &BackupRecord) -> Result<(), StoreError> {
        let current_version = match self.read_envelope(document_id) {
            Ok(envelope) => envelope.version,
            Err(StoreError::NotFound { .. }) => 0,
            Err(err) => return Err(err),
        };
        let version = current_version.max(backup.version) + 1;
        self.write_envelope(
            document_id,
            &PageEnvelope {
                version,
                title: backup.metadata.title.clone(),
                space_id: backup.metadata.space_id.clone(),
                body: backup.tree.as_value().clone(),
            },
        )?;
        tracing::debug!(document_id, version, from_backup = %backup.timestamp, "page restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupTimestamp;
    use serde_json::json;
    use tempfile::tempdir;

    fn body(text: &str) -> Value {
        json!({
            "type": "doc",
            "content": [{"type": "paragraph", "content": [{"type": "text", "text": text}]}]
        })
    }

    fn seed(store: &FsDocumentStore, id: &str, version: u64, text: &str) {
        store
            .write_envelope(
                id,
                &PageEnvelope {
                    version,
                    title: "Notes".to_string(),
                    space_id: None,
                    body: body(text),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_fetch_and_versioned_write() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        seed(&store, "7", 3, "before");

        let fetched = store.fetch("7").unwrap();
        assert_eq!(fetched.version, 3);
        assert_eq!(fetched.metadata.title, "Notes");

        let updated = Document::from_value(body("after")).unwrap();
        assert_eq!(store.write("7", 3, &updated).unwrap(), 4);
        assert_eq!(store.fetch("7").unwrap().tree, updated);
        assert_eq!(store.fetch("7").unwrap().metadata.title, "Notes");
    }

    #[test]
    fn test_stale_write_conflicts() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        seed(&store, "7", 5, "current");

        let tree = Document::from_value(body("mine")).unwrap();
        match store.write("7", 4, &tree).unwrap_err() {
            StoreError::VersionConflict {
                expected, found, ..
            } => {
                assert_eq!(expected, 4);
                assert_eq!(found, 5);
            }
            other => panic!("Expected version conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_restore_writes_backup_as_new_version() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        seed(&store, "7", 9, "broken");

        let backup = BackupRecord {
            document_id: "7".to_string(),
            version: 8,
            metadata: DocumentMetadata {
                title: "Notes".to_string(),
                space_id: Some("ENG".to_string()),
            },
            timestamp: BackupTimestamp::now(),
            tree: Document::from_value(body("good")).unwrap(),
        };
        store.restore("7", &backup).unwrap();

        let fetched = store.fetch("7").unwrap();
        assert_eq!(fetched.version, 10);
        assert_eq!(fetched.tree, backup.tree);
        assert_eq!(fetched.metadata.space_id.as_deref(), Some("ENG"));
    }

    #[test]
    fn test_missing_page() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.fetch("nope"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.fetch("../nope"),
            Err(StoreError::Rejected { .. })
        ));
    }
}
