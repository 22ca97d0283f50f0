//! In-memory blob store.

use super::{BlobStore, ServiceError};
use async_trait::async_trait;
use dashmap::DashMap;

/// A [`BlobStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Returns true if `key` is stored.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ServiceError> {
        if key.is_empty() {
            return Err(ServiceError::invalid("blob key is empty"));
        }
        self.blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ServiceError> {
        self.blobs
            .get(key)
            .map(|b| b.value().clone())
            .ok_or_else(|| ServiceError::invalid(format!("no blob stored under '{key}'")))
    }
}
