//! Object store gateway for raw uploads and derived assets
//!
//! Thin capability over the `object_store` crate with the fixed path
//! scheme the rest of the core relies on:
//!
//! ```text
//! uploads/{tenant_id}/{job_id}.{ext}              raw upload, immutable
//! derived/{tenant_id}/{candidate_id}/{asset}      extracted assets
//! ```

use object_store::{ObjectStore, path::Path as StoragePath};
use std::sync::Arc;
use thiserror::Error;

use crate::files::FileKind;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Gateway wrapping any object_store backend
#[derive(Clone)]
pub struct ObjectStoreGateway {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreGateway {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// In-memory backend for tests and development
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
        }
    }

    /// Filesystem backend rooted at `root`
    pub fn local(root: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| StorageError::UploadFailed(format!("create {}: {e}", root.display())))?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Canonical key for a raw upload
    pub fn upload_key(tenant_id: &str, job_id: &str, kind: FileKind) -> String {
        format!("uploads/{}/{}.{}", tenant_id, job_id, kind.extension())
    }

    /// Canonical key for a derived asset (photo, portfolio capture)
    pub fn derived_key(tenant_id: &str, candidate_id: &str, asset: &str) -> String {
        format!("derived/{}/{}/{}", tenant_id, candidate_id, asset)
    }

    pub async fn put(&self, key: &str, data: Vec<u8>) -> Result<UploadMetadata> {
        let path = StoragePath::from(key);
        let size = data.len();

        let put_result = self.store.put(&path, data.into()).await?;

        tracing::info!(key, size, "Stored object");

        Ok(UploadMetadata {
            key: key.to_string(),
            etag: put_result.e_tag.clone(),
            size,
        })
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = StoragePath::from(key);

        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::from(other),
        })?;
        let bytes = result.bytes().await?;

        tracing::debug!(key, size = bytes.len(), "Fetched object");

        Ok(bytes.to_vec())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = StoragePath::from(key);
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Size of a staged object, for validating JSON submits that reference
    /// a presigned-PUT upload
    pub async fn size_of(&self, key: &str) -> Result<u64> {
        let path = StoragePath::from(key);
        let meta = self.store.head(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::from(other),
        })?;
        Ok(meta.size)
    }
}
