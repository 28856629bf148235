//! # Photo Storage Seam
//!
//! Orders may carry a photo of the invoice or the package. Where the bytes
//! end up (object store, CDN, local disk) is outside this crate; the service
//! only needs a URL back.
//!
//! Uploads are best-effort: a failure is logged and the order is saved
//! without the new photo.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use almacen_core::PhotoUpload;

/// Photo upload errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Photo rejected: {0}")]
    Rejected(String),

    #[error("Photo store unavailable: {0}")]
    Unavailable(String),
}

/// Where order photos are stored.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Stores `photo` for `order_id` and returns its public URL.
    async fn upload(&self, order_id: &str, photo: &PhotoUpload) -> Result<String, StorageError>;
}

/// Keeps photos in process memory. Used by tests and the seed binary.
#[derive(Debug, Default, Clone)]
pub struct MemoryPhotoStore {
    photos: Arc<RwLock<HashMap<String, PhotoUpload>>>,
}

impl MemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored photos.
    pub async fn len(&self) -> usize {
        self.photos.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.photos.read().await.is_empty()
    }
}

#[async_trait]
impl PhotoStore for MemoryPhotoStore {
    async fn upload(&self, order_id: &str, photo: &PhotoUpload) -> Result<String, StorageError> {
        if photo.bytes.is_empty() {
            return Err(StorageError::Rejected("empty file".to_string()));
        }
        if !photo.content_type.starts_with("image/") {
            return Err(StorageError::Rejected(format!(
                "unsupported content type {}",
                photo.content_type
            )));
        }

        let key = format!("{}/{}", order_id, photo.file_name);
        self.photos.write().await.insert(key.clone(), photo.clone());
        Ok(format!("memory://{}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(content_type: &str, bytes: &[u8]) -> PhotoUpload {
        PhotoUpload {
            file_name: "factura.jpg".to_string(),
            content_type: content_type.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryPhotoStore::new();

        let url = store.upload("o-1", &photo("image/jpeg", b"jpg")).await.unwrap();
        assert_eq!(url, "memory://o-1/factura.jpg");
        assert_eq!(store.len().await, 1);

        assert!(store.upload("o-1", &photo("image/jpeg", b"")).await.is_err());
        assert!(store.upload("o-1", &photo("text/plain", b"x")).await.is_err());
        assert_eq!(store.len().await, 1);
    }
}
