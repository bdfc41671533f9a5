//! Object gateway reached over plain HTTP
//!
//! Targets S3-compatible servers (MinIO in practice) whose bucket policy
//! allows anonymous object access, so every operation is a bare
//! `PUT`/`GET`/`HEAD`/`DELETE` on `{base_url}/{bucket}/{key}`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use super::BlobStore;
use crate::error::{Error, Result};

/// HTTP object gateway client
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
}

impl HttpBlobStore {
    /// Create a client for `{base_url}/{bucket}`
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Storage(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into().trim_matches('/').to_string(),
        })
    }

    fn url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}

fn network(key: &str, e: reqwest::Error) -> Error {
    Error::Storage(format!("{key}: {e}"))
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let content_type = if key.ends_with(".jsonl") {
            "application/x-ndjson"
        } else {
            "application/octet-stream"
        };
        let resp = self
            .client
            .put(self.url(key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| network(key, e))?;
        if !resp.status().is_success() {
            return Err(Error::Storage(format!(
                "{key}: PUT returned HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get(self.url(key))
            .send()
            .await
            .map_err(|e| network(key, e))?;
        match resp.status() {
            s if s.is_success() => resp.bytes().await.map_err(|e| network(key, e)),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("object not found: {key}"))),
            s => Err(Error::Storage(format!("{key}: GET returned HTTP {s}"))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let resp = self
            .client
            .head(self.url(key))
            .send()
            .await
            .map_err(|e| network(key, e))?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(Error::Storage(format!("{key}: HEAD returned HTTP {s}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(key))
            .send()
            .await
            .map_err(|e| network(key, e))?;
        match resp.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            s => Err(Error::Storage(format!("{key}: DELETE returned HTTP {s}"))),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        // Anonymous gateways don't expose bucket listing.
        Err(Error::Storage(format!(
            "{prefix}: prefix deletes are not supported over the HTTP gateway"
        )))
    }

    fn direct_url(&self, key: &str) -> Option<String> {
        Some(self.url(key))
    }

    fn name(&self) -> &str {
        "http"
    }
}
