use super::{
    BackupError, BackupRecord, BackupStore, BackupTimestamp, DocumentMetadata,
    validate_document_id,
};
use crate::tree::Document;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FORMAT_VERSION: u32 = 1;
const EXTENSION: &str = "json";

/// One directory per document id, one file per backup:
/// `<root>/<document_id>/<timestamp>.json`.
#[derive(Debug)]
pub struct FsBackupStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: u32,
    checksum: u32,
    record: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    document_id: String,
    version: u64,
    metadata: DocumentMetadata,
    timestamp: BackupTimestamp,
    tree: Value,
}

impl FsBackupStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, BackupError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_dir(&self, document_id: &str) -> Result<PathBuf, BackupError> {
        validate_document_id(document_id)?;
        Ok(self.root.join(document_id))
    }

    fn backup_path(dir: &Path, timestamp: BackupTimestamp) -> PathBuf {
        dir.join(format!("{timestamp}.{EXTENSION}"))
    }
}

impl BackupStore for FsBackupStore {
    fn save(
        &self,
        document_id: &str,
        tree: &Document,
        version: u64,
        metadata: &DocumentMetadata,
        timestamp: BackupTimestamp,
    ) -> Result<BackupTimestamp, BackupError> {
        let dir = self.document_dir(document_id)?;
        fs::create_dir_all(&dir)?;

        let mut timestamp = timestamp;
        while Self::backup_path(&dir, timestamp).exists() {
            timestamp = timestamp.next();
        }

        let record = serde_json::to_value(StoredRecord {
            document_id: document_id.to_string(),
            version,
            metadata: metadata.clone(),
            timestamp,
            tree: tree.as_value().clone(),
        })?;
        let envelope = Envelope {
            format: FORMAT_VERSION,
            checksum: checksum_bytes(&serde_json::to_vec(&record)?),
            record,
        };
        let encoded = serde_json::to_vec_pretty(&envelope)?;

        let path = Self::backup_path(&dir, timestamp);
        let temp_path = dir.join(format!("{timestamp}.tmp"));
        fs::write(&temp_path, &encoded)?;
        fs::rename(&temp_path, &path)?;

        tracing::debug!(document_id, %timestamp, path = %path.display(), "backup written");
        Ok(timestamp)
    }

    fn list(&self, document_id: &str) -> Result<Vec<BackupTimestamp>, BackupError> {
        let dir = self.document_dir(document_id)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut timestamps = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                err.into_io_error()
                    .unwrap_or_else(|| io::Error::other("backup directory walk failed"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match stem.parse::<BackupTimestamp>() {
                Ok(timestamp) => timestamps.push(timestamp),
                Err(_) => {
                    tracing::warn!(path = %path.display(), "ignoring unrecognised file in backup directory");
                }
            }
        }
        timestamps.sort();
        Ok(timestamps)
    }

    fn load(
        &self,
        document_id: &str,
        timestamp: BackupTimestamp,
    ) -> Result<BackupRecord, BackupError> {
        let dir = self.document_dir(document_id)?;
        let bytes = match fs::read(Self::backup_path(&dir, timestamp)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound {
                    document_id: document_id.to_string(),
                    timestamp: Some(timestamp),
                });
            }
            Err(err) => return Err(BackupError::Io(err)),
        };

        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|_| BackupError::Corrupt("decode"))?;
        if envelope.format != FORMAT_VERSION {
            return Err(BackupError::Corrupt("format version"));
        }
        if checksum_bytes(&serde_json::to_vec(&envelope.record)?) != envelope.checksum {
            return Err(BackupError::Corrupt("checksum mismatch"));
        }

        let stored: StoredRecord =
            serde_json::from_value(envelope.record).map_err(|_| BackupError::Corrupt("record"))?;
        if stored.document_id != document_id || stored.timestamp != timestamp {
            return Err(BackupError::Corrupt("record does not match its location"));
        }
        let tree = Document::from_value(stored.tree).map_err(|_| BackupError::Corrupt("tree"))?;

        Ok(BackupRecord {
            document_id: stored.document_id,
            version: stored.version,
            metadata: stored.metadata,
            timestamp: stored.timestamp,
            tree,
        })
    }

    fn prune(&self, document_id: &str, keep: usize) -> Result<usize, BackupError> {
        let timestamps = self.list(document_id)?;
        let excess = timestamps.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(0);
        }

        let dir = self.document_dir(document_id)?;
        for timestamp in &timestamps[..excess] {
            match fs::remove_file(Self::backup_path(&dir, *timestamp)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(BackupError::Io(err)),
            }
            tracing::debug!(document_id, timestamp = %timestamp, "backup pruned");
        }
        Ok(excess)
    }
}

fn checksum_bytes(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    fn tree(text: &str) -> Document {
        Document::from_value(json!({
            "type": "doc",
            "content": [{"type": "paragraph", "content": [{"type": "text", "text": text}]}]
        }))
        .unwrap()
    }

    fn at(second: u32) -> BackupTimestamp {
        BackupTimestamp::from_datetime(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, second).unwrap())
    }

    fn meta() -> DocumentMetadata {
        DocumentMetadata {
            title: "Release notes".to_string(),
            space_id: Some("ENG".to_string()),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FsBackupStore::open(dir.path()).unwrap();
        let saved = store.save("42", &tree("hello"), 7, &meta(), at(1)).unwrap();

        let record = store.load("42", saved).unwrap();
        assert_eq!(record.version, 7);
        assert_eq!(record.metadata, meta());
        assert_eq!(record.tree, tree("hello"));
        assert!(dir.path().join("42").join("2024-05-01T09-30-01-000000.json").exists());
    }

    #[test]
    fn test_list_is_chronological_and_skips_strays() {
        let dir = tempdir().unwrap();
        let store = FsBackupStore::open(dir.path()).unwrap();
        store.save("42", &tree("b"), 2, &meta(), at(5)).unwrap();
        store.save("42", &tree("a"), 1, &meta(), at(3)).unwrap();
        fs::write(dir.path().join("42").join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("42").join("garbage.json"), "{}").unwrap();

        assert_eq!(store.list("42").unwrap(), vec![at(3), at(5)]);
        assert!(store.list("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_colliding_timestamp_is_bumped() {
        let dir = tempdir().unwrap();
        let store = FsBackupStore::open(dir.path()).unwrap();
        let first = store.save("42", &tree("a"), 1, &meta(), at(0)).unwrap();
        let second = store.save("42", &tree("b"), 2, &meta(), at(0)).unwrap();
        assert_eq!(second, first.next());
        assert_eq!(store.load("42", first).unwrap().version, 1);
        assert_eq!(store.load("42", second).unwrap().version, 2);
    }

    #[test]
    fn test_corruption_detection() {
        let dir = tempdir().unwrap();
        let store = FsBackupStore::open(dir.path()).unwrap();
        let saved = store.save("42", &tree("hello"), 1, &meta(), at(0)).unwrap();

        let path = dir.path().join("42").join(format!("{saved}.json"));
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.replace("hello", "jello")).unwrap();

        match store.load("42", saved).unwrap_err() {
            BackupError::Corrupt(msg) => assert_eq!(msg, "checksum mismatch"),
            other => panic!("Expected corruption error, got {other:?}"),
        }
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempdir().unwrap();
        let store = FsBackupStore::open(dir.path()).unwrap();
        for second in 0..4 {
            store
                .save("42", &tree("x"), u64::from(second), &meta(), at(second))
                .unwrap();
        }
        assert_eq!(store.prune("42", 2).unwrap(), 2);
        assert_eq!(store.list("42").unwrap(), vec![at(2), at(3)]);
        assert!(matches!(
            store.load("42", at(0)),
            Err(BackupError::NotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = FsBackupStore::open(dir.path()).unwrap();
        let err = store.save("../escape", &tree("x"), 1, &meta(), at(0)).unwrap_err();
        assert!(matches!(err, BackupError::InvalidDocumentId(_)));
    }
}
