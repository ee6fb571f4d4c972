//! Blob storage for inputs, processed outputs and reference images.

use async_trait::async_trait;
use dashmap::DashMap;
use resilience::ErrorKind;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object name: {0}")]
    InvalidName(String),
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::InvalidName(_) => ErrorKind::InvalidInput,
            StorageError::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Opaque blob mover.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError>;
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;
    /// Returns whether an object was removed.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;
}

/// Objects as files below `root`. Names are relative, `/`-separated and may
/// not climb out of the root.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(name);
        let clean = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.resolve(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(name)
            .map(|v| v.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.objects.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.objects.remove(name).is_some())
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(name))
    }
}

/// Prefix layout on top of an [`ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Where callers drop documents to be processed.
    pub download_prefix: String,
    /// Where processed artifacts are written.
    pub upload_prefix: String,
    /// Where per-employee reference images live.
    pub reference_prefix: String,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            download_prefix: "img/".to_string(),
            upload_prefix: "processing/".to_string(),
            reference_prefix: "emp/".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Storage {
    objects: Arc<dyn ObjectStore>,
    layout: StorageLayout,
}

impl Storage {
    pub fn new(objects: Arc<dyn ObjectStore>, layout: StorageLayout) -> Self {
        Self { objects, layout }
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub async fn download(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        let name = format!("{}{filename}", self.layout.download_prefix);
        let bytes = self.objects.get(&name).await?;
        tracing::debug!(object = %name, size = bytes.len(), "downloaded object");
        Ok(bytes)
    }

    /// Write a processed artifact and return its object name.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let name = format!("{}{filename}", self.layout.upload_prefix);
        self.objects.put(&name, bytes).await?;
        tracing::debug!(object = %name, size = bytes.len(), "uploaded object");
        Ok(name)
    }

    pub async fn reference_image(&self, emp_id: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(&format!("{}{emp_id}.jpg", self.layout.reference_prefix))
            .await
    }
}
