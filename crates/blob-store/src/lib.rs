//! Content-addressable blob storage contract
//!
//! The annotation core only ever calls `get` on existing ids and `put`
//! with freshly generated ids. `put` refuses to overwrite, which is what
//! keeps original documents immutable: finalize writes its output under a
//! new id and the original bytes stay retrievable forever.

use doc_model::BlobId;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob {0} not found")]
    NotFound(BlobId),
    #[error("blob {0} already exists; blobs are immutable")]
    AlreadyExists(BlobId),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait BlobStore {
    fn get(&self, id: &BlobId) -> Result<Vec<u8>, BlobStoreError>;

    /// Store bytes under a fresh id; existing ids are never overwritten
    fn put(&mut self, id: BlobId, bytes: Vec<u8>) -> Result<BlobId, BlobStoreError>;

    fn contains(&self, id: &BlobId) -> bool;
}

/// In-memory store, used by tests and as the session-local cache
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<BlobId, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, id: &BlobId) -> Result<Vec<u8>, BlobStoreError> {
        self.blobs.get(id).cloned().ok_or_else(|| BlobStoreError::NotFound(id.clone()))
    }

    fn put(&mut self, id: BlobId, bytes: Vec<u8>) -> Result<BlobId, BlobStoreError> {
        if self.blobs.contains_key(&id) {
            return Err(BlobStoreError::AlreadyExists(id));
        }
        self.blobs.insert(id.clone(), bytes);
        Ok(id)
    }

    fn contains(&self, id: &BlobId) -> bool {
        self.blobs.contains_key(id)
    }
}

/// One file per blob under a root directory
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(&id.0)
    }
}

impl BlobStore for DirBlobStore {
    fn get(&self, id: &BlobId) -> Result<Vec<u8>, BlobStoreError> {
        let path = self.blob_path(id);
        if !path.exists() {
            return Err(BlobStoreError::NotFound(id.clone()));
        }
        Ok(fs::read(path)?)
    }

    fn put(&mut self, id: BlobId, bytes: Vec<u8>) -> Result<BlobId, BlobStoreError> {
        let path = self.blob_path(&id);
        if path.exists() {
            return Err(BlobStoreError::AlreadyExists(id));
        }
        fs::create_dir_all(&self.root)?;

        // Atomic write: temp file then rename
        let temp = path.with_extension("tmp");
        fs::write(&temp, &bytes)?;
        fs::rename(&temp, &path)?;
        Ok(id)
    }

    fn contains(&self, id: &BlobId) -> bool {
        self.blob_path(id).exists()
    }
}
