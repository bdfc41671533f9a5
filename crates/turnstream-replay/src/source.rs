//! Trace sources - where a tail reads a session's durable JSONL log
//!
//! Every source offers two read paths: a proxy path (the backend reads the
//! object on the caller's behalf) and a direct path (a URL to the object
//! itself). A tail prefers the proxy and falls back to the direct URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use turnstream_core::{trace_key, BlobStore};

use crate::error::{Error, Result};

/// Read access to durable traces
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Whole trace through the proxy path; `NotFound` if nothing was flushed yet
    async fn fetch_proxy(&self, session_id: &str) -> Result<String>;

    /// Direct URL of the session's trace object
    async fn resolve_direct_url(&self, session_id: &str) -> Result<String>;

    /// Whole trace from a direct URL
    async fn fetch_direct(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TraceLink {
    #[serde(default)]
    trace_url: Option<String>,
}

/// Reads traces through the turnstream HTTP API
#[derive(Debug, Clone)]
pub struct HttpTraceSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTraceSource {
    /// Source for the service at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn trace_url(&self, session_id: &str) -> String {
        format!("{}/trace/{}", self.base_url, session_id)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(url.to_string())),
            s if s.is_success() => {
                let body = resp.text().await?;
                if body.is_empty() {
                    Err(Error::NotFound(url.to_string()))
                } else {
                    Ok(body)
                }
            }
            s => Err(Error::Status {
                status: s.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl TraceSource for HttpTraceSource {
    async fn fetch_proxy(&self, session_id: &str) -> Result<String> {
        let url = format!("{}?raw=1", self.trace_url(session_id));
        self.get_text(&url).await
    }

    async fn resolve_direct_url(&self, session_id: &str) -> Result<String> {
        let url = self.trace_url(session_id);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        let link: TraceLink = resp.json().await?;
        link.trace_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::DirectUrlUnavailable(session_id.to_string()))
    }

    async fn fetch_direct(&self, url: &str) -> Result<String> {
        self.get_text(url).await
    }
}

/// Reads traces straight from a blob store (same-process consumers, tests)
#[derive(Clone)]
pub struct StoreTraceSource {
    store: Arc<dyn BlobStore>,
    trace_prefix: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for StoreTraceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTraceSource")
            .field("store", &self.store.name())
            .field("trace_prefix", &self.trace_prefix)
            .finish()
    }
}

impl StoreTraceSource {
    /// Source over `store`, traces under `trace_prefix`
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, trace_prefix: impl Into<String>) -> Self {
        Self {
            store,
            trace_prefix: trace_prefix.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TraceSource for StoreTraceSource {
    async fn fetch_proxy(&self, session_id: &str) -> Result<String> {
        let body = self
            .store
            .get(&trace_key(&self.trace_prefix, session_id))
            .await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn resolve_direct_url(&self, session_id: &str) -> Result<String> {
        self.store
            .direct_url(&trace_key(&self.trace_prefix, session_id))
            .ok_or_else(|| Error::DirectUrlUnavailable(session_id.to_string()))
    }

    async fn fetch_direct(&self, url: &str) -> Result<String> {
        if let Some(path) = url.strip_prefix("file://") {
            return match tokio::fs::read_to_string(path).await {
                Ok(body) => Ok(body),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Error::NotFound(url.to_string()))
                }
                Err(e) => Err(Error::Network(format!("{url}: {e}"))),
            };
        }
        let resp = self.client.get(url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(url.to_string())),
            s if s.is_success() => Ok(resp.text().await?),
            s => Err(Error::Status {
                status: s.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}
