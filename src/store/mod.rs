//! Where documents are fetched from and written back to.

use crate::backup::{BackupRecord, DocumentMetadata};
use crate::tree::Document;

#[cfg(feature = "storage")]
mod fs;

#[cfg(feature = "storage")]
pub use fs::{FsDocumentStore, PageEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {document_id} not found")]
    NotFound { document_id: String },
    #[error("version conflict on {document_id}: expected {expected}, found {found}")]
    VersionConflict {
        document_id: String,
        expected: u64,
        found: u64,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store rejected {document_id}: {reason}")]
    Rejected { document_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    pub document_id: String,
    pub version: u64,
    pub metadata: DocumentMetadata,
    pub tree: Document,
}

pub trait DocumentStore {
    fn fetch(&self, document_id: &str) -> Result<FetchedDocument, StoreError>;

    /// Writes `tree` on top of `base_version`. Fails with
    /// [`StoreError::VersionConflict`] if the stored version moved on.
    /// Returns the new version.
    fn write(
        &self,
        document_id: &str,
        base_version: u64,
        tree: &Document,
    ) -> Result<u64, StoreError>;

    /// Puts the backed-up tree back in place, whatever the current version.
    fn restore(&self, document_id: &str, backup: &BackupRecord) -> Result<(), StoreError>;
}
