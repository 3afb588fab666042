use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use watchdog_core::{
    error::{Error, ErrorCode, Result},
    utils::sanitize_filename,
};

/// Object-store port for uploaded documents.
///
/// The production deployment points this at S3/MinIO; the filesystem and
/// in-memory implementations below serve the composition root and tests.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn head(&self, key: &str) -> Result<bool>;
    async fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<String>;
    async fn presign_put(&self, key: &str, content_type: &str, ttl_seconds: u64) -> Result<String>;
}

/// Build the canonical document key:
/// `documents/{YYYY}/{MM}/{uuid}-{sanitized-filename}`.
pub fn build_document_key(uploaded_at: DateTime<Utc>, id: Uuid, filename: &str) -> String {
    format!(
        "documents/{:04}/{:02}/{}-{}",
        uploaded_at.year(),
        uploaded_at.month(),
        id,
        sanitize_filename(filename)
    )
}

/// Local filesystem implementation of the object store port.
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are internally generated, but refuse traversal anyway
        if key.split('/').any(|segment| segment == "..") {
            return Err(Error::new(ErrorCode::StorageError, "Invalid storage key"));
        }
        Ok(self.root.join(Path::new(key)))
    }
}

#[async_trait]
impl ObjectStorage for FilesystemStorage {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::new(ErrorCode::StorageError, format!("mkdir failed: {}", e))
            })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::new(ErrorCode::StorageError, format!("write failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::new(ErrorCode::StorageError, format!("read failed: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::new(
                ErrorCode::StorageError,
                format!("delete failed: {}", e),
            )),
        }
    }

    async fn head(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<String> {
        let expires = Utc::now().timestamp() + ttl_seconds as i64;
        Ok(format!("file://{}?expires={}", key, expires))
    }

    async fn presign_put(&self, key: &str, _content_type: &str, ttl_seconds: u64) -> Result<String> {
        let expires = Utc::now().timestamp() + ttl_seconds as i64;
        Ok(format!("file://{}?expires={}&method=put", key, expires))
    }
}

/// In-memory object store for tests.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::new(ErrorCode::StorageError, format!("no such object: {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<String> {
        Ok(format!("memory://{}?expires={}", key, ttl_seconds))
    }

    async fn presign_put(&self, key: &str, _content_type: &str, ttl_seconds: u64) -> Result<String> {
        Ok(format!("memory://{}?expires={}&method=put", key, ttl_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_document_key_shape() {
        let uploaded_at = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let id = Uuid::nil();
        let key = build_document_key(uploaded_at, id, "Rechnung März.pdf");
        assert_eq!(
            key,
            "documents/2024/03/00000000-0000-0000-0000-000000000000-Rechnung-M-rz.pdf"
        );
    }

    #[tokio::test]
    async fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        storage.put("documents/a", b"bytes", "application/pdf").await.unwrap();

        assert!(storage.head("documents/a").await.unwrap());
        assert_eq!(storage.get("documents/a").await.unwrap(), b"bytes");

        storage.delete("documents/a").await.unwrap();
        assert!(!storage.head("documents/a").await.unwrap());
        assert!(storage.get("documents/a").await.is_err());
    }
}
