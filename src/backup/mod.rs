//! Pre-edit backups of document trees.
//!
//! A backup is taken as soon as a document is fetched for editing and is
//! what a failed write is rolled back to. Backups are kept per document id
//! and pruned to a retention limit right after each one is created.

use crate::tree::Document;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

#[cfg(feature = "storage")]
mod fs;

#[cfg(feature = "storage")]
pub use fs::FsBackupStore;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%6f";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no backup for document {document_id}{}", .timestamp.map(|t| format!(" at {t}")).unwrap_or_default())]
    NotFound {
        document_id: String,
        timestamp: Option<BackupTimestamp>,
    },
    #[error("corrupt backup: {0}")]
    Corrupt(&'static str),
    #[error("invalid document id: {0:?}")]
    InvalidDocumentId(String),
}

/// Backup creation time, microsecond precision.
///
/// Renders as `2024-05-01T09-30-00-000123`, which sorts chronologically as
/// plain text and is safe to use as a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupTimestamp(DateTime<Utc>);

impl BackupTimestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        // Truncate to what the text form can carry so parsing round-trips.
        let micros = at.timestamp_micros();
        Self(DateTime::from_timestamp_micros(micros).unwrap_or(at))
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// The next representable timestamp, used to separate colliding backups.
    pub fn next(&self) -> Self {
        Self(self.0 + chrono::Duration::microseconds(1))
    }
}

impl fmt::Display for BackupTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for BackupTimestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)?;
        Ok(Self(naive.and_utc()))
    }
}

impl Serialize for BackupTimestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BackupTimestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub document_id: String,
    pub version: u64,
    pub metadata: DocumentMetadata,
    pub timestamp: BackupTimestamp,
    pub tree: Document,
}

pub trait BackupStore {
    /// Stores a backup and returns the timestamp it was filed under. A
    /// timestamp already taken for the document is moved forward.
    fn save(
        &self,
        document_id: &str,
        tree: &Document,
        version: u64,
        metadata: &DocumentMetadata,
        timestamp: BackupTimestamp,
    ) -> Result<BackupTimestamp, BackupError>;

    /// Timestamps of the stored backups, oldest first.
    fn list(&self, document_id: &str) -> Result<Vec<BackupTimestamp>, BackupError>;

    fn load(
        &self,
        document_id: &str,
        timestamp: BackupTimestamp,
    ) -> Result<BackupRecord, BackupError>;

    /// Deletes the oldest backups until at most `keep` remain. Returns how
    /// many were removed.
    fn prune(&self, document_id: &str, keep: usize) -> Result<usize, BackupError>;

    /// Saves a backup and immediately applies the retention limit.
    fn create_backup(
        &self,
        document_id: &str,
        tree: &Document,
        version: u64,
        metadata: &DocumentMetadata,
        retention_limit: usize,
    ) -> Result<BackupTimestamp, BackupError> {
        let timestamp = self.save(
            document_id,
            tree,
            version,
            metadata,
            BackupTimestamp::now(),
        )?;
        let pruned = self.prune(document_id, retention_limit)?;
        tracing::info!(document_id, %timestamp, version, pruned, "backup created");
        Ok(timestamp)
    }

    fn latest(&self, document_id: &str) -> Result<BackupRecord, BackupError> {
        let timestamp = self
            .list(document_id)?
            .pop()
            .ok_or_else(|| BackupError::NotFound {
                document_id: document_id.to_string(),
                timestamp: None,
            })?;
        self.load(document_id, timestamp)
    }
}

/// Backups held in process memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    backups: Mutex<BTreeMap<String, BTreeMap<BackupTimestamp, BackupRecord>>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_backups<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, BTreeMap<BackupTimestamp, BackupRecord>>) -> T,
    ) -> T {
        let mut guard = match self.backups.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl BackupStore for MemoryBackupStore {
    fn save(
        &self,
        document_id: &str,
        tree: &Document,
        version: u64,
        metadata: &DocumentMetadata,
        timestamp: BackupTimestamp,
    ) -> Result<BackupTimestamp, BackupError> {
        validate_document_id(document_id)?;
        self.with_backups(|backups| {
            let entries = backups.entry(document_id.to_string()).or_default();
            let mut timestamp = timestamp;
            while entries.contains_key(&timestamp) {
                timestamp = timestamp.next();
            }
            entries.insert(
                timestamp,
                BackupRecord {
                    document_id: document_id.to_string(),
                    version,
                    metadata: metadata.clone(),
                    timestamp,
                    tree: tree.clone(),
                },
            );
            Ok(timestamp)
        })
    }

    fn list(&self, document_id: &str) -> Result<Vec<BackupTimestamp>, BackupError> {
        Ok(self.with_backups(|backups| {
            backups
                .get(document_id)
                .map(|entries| entries.keys().copied().collect())
                .unwrap_or_default()
        }))
    }

    fn load(
        &self,
        document_id: &str,
        timestamp: BackupTimestamp,
    ) -> Result<BackupRecord, BackupError> {
        self.with_backups(|backups| {
            backups
                .get(document_id)
                .and_then(|entries| entries.get(&timestamp))
                .cloned()
                .ok_or_else(|| BackupError::NotFound {
                    document_id: document_id.to_string(),
                    timestamp: Some(timestamp),
                })
        })
    }

    fn prune(&self, document_id: &str, keep: usize) -> Result<usize, BackupError> {
        Ok(self.with_backups(|backups| {
            let Some(entries) = backups.get_mut(document_id) else {
                return 0;
            };
            let excess = entries.len().saturating_sub(keep);
            let doomed: Vec<BackupTimestamp> = entries.keys().take(excess).copied().collect();
            for timestamp in &doomed {
                entries.remove(timestamp);
            }
            doomed.len()
        }))
    }
}

/// Document ids become file and directory names, so they must stay a
/// single, ordinary path component.
pub(crate) fn is_safe_document_id(document_id: &str) -> bool {
    !(document_id.is_empty()
        || document_id == "."
        || document_id == ".."
        || document_id.contains(['/', '\\', '\0']))
}

pub(crate) fn validate_document_id(document_id: &str) -> Result<(), BackupError> {
    if !is_safe_document_id(document_id) {
        return Err(BackupError::InvalidDocumentId(document_id.to_string()));
    }
    Ok(())
}
