//! In-memory blob store

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::BlobStore;
use crate::error::{Error, Result};

/// Process-local object store.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryBlobStore {
    /// Creates a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> Error {
    Error::Internal("lock poisoned".into())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .map_err(|_| poisoned())?
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object not found: {key}")))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().map_err(|_| poisoned())?.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(prefix));
        Ok(before - objects.len())
    }

    fn direct_url(&self, _key: &str) -> Option<String> {
        None
    }

    fn name(&self) -> &str {
        "memory"
    }
}
