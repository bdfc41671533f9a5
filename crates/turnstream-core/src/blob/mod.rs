//! Blob store - the external key/value object store holding durable traces
//!
//! The event bus only needs whole-object `put`/`get`/`exists` semantics; the
//! object store's internals are someone else's concern. Backends:
//! - `MemoryBlobStore`: process-local map, used by tests and single-node dev runs
//! - `FsBlobStore`: a directory on local disk
//! - `HttpBlobStore`: a public-bucket object gateway (e.g. MinIO with an
//!   anonymous read/write policy) addressed as `{base_url}/{bucket}/{key}`

mod fs;
mod http;
mod memory;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use fs::FsBlobStore;
pub use http::HttpBlobStore;
pub use memory::MemoryBlobStore;

/// Object store contract.
///
/// Keys are `/`-separated relative paths (`trace/<session>.jsonl`).
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Overwrite (or create) the object at `key`
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read the whole object.
    ///
    /// Returns `Error::NotFound` if the object does not exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Whether the object exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete an object. Succeeds if it does not exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every object under `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// URL a client can fetch the object from directly, if the backend has one
    fn direct_url(&self, key: &str) -> Option<String>;

    /// Backend name (for logging and health output)
    fn name(&self) -> &str;
}

/// Join key segments with `/`, dropping empty segments and stray slashes
#[must_use]
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Durable trace key for a session (`<prefix>/<session_id>.jsonl`)
#[must_use]
pub fn trace_key(prefix: &str, session_id: &str) -> String {
    join_key(&[prefix, &format!("{session_id}.jsonl")])
}

/// Prefix holding a session's uploaded artifacts
#[must_use]
pub fn artifact_prefix(session_id: &str) -> String {
    join_key(&["artifacts", session_id])
}
