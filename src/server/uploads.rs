//! Upload registration
//!
//! Files reach the store two ways: posted directly (`/upload`), or copied
//! from the chat front end's attachment directory (`/ingest/openwebui`).
//! Both land under `uploaded/<session core>_<original name>`, with the
//! `<uuid>_` prefix the front end adds to saved attachments removed.
//!
//! Turns that only name a file resolve it through the same ingest path. The
//! resulting object key is cached per session and name, so both phases of a
//! turn see the same key without copying the file twice.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};
use turnstream_core::BlobStore;
use turnstream_turns::{sid_core, UPLOAD_PREFIX};

static UUID_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}_(.+)$")
        .expect("UUID_PREFIX is a compile-time constant")
});

const AUTO_PICK: &str = "_auto";

/// Why an upload could not be registered
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("session_id required")]
    MissingSession,
    #[error("no file in request")]
    MissingFile,
    #[error("invalid filename scope")]
    InvalidScope,
    #[error("upload directory is not configured")]
    Unconfigured,
    #[error("{0}")]
    NotFound(String),
    #[error("failed to read upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to store upload: {0}")]
    Store(#[from] turnstream_core::Error),
}

/// A front-end upload now present in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub object: String,
    /// File name in the attachment directory
    pub source: String,
    /// The object was already stored and was reused
    pub exists: bool,
}

/// File name without directories or the front end's `<uuid>_` prefix
pub fn strip_upload_prefix(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    UUID_PREFIX
        .captures(base)
        .and_then(|c| c.get(1))
        .map_or(base, |m| m.as_str())
}

/// Stores uploads and resolves turn file names to object keys
pub struct UploadRegistry {
    store: Arc<dyn BlobStore>,
    session_prefix: String,
    webui_dir: Option<PathBuf>,
    prefer_ext: Option<String>,
    resolved: DashMap<(String, String), String>,
}

impl std::fmt::Debug for UploadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRegistry")
            .field("webui_dir", &self.webui_dir)
            .field("resolved", &self.resolved.len())
            .finish()
    }
}

impl UploadRegistry {
    pub fn new(
        store: Arc<dyn BlobStore>,
        session_prefix: impl Into<String>,
        webui_dir: Option<PathBuf>,
        prefer_ext: Option<String>,
    ) -> Self {
        Self {
            store,
            session_prefix: session_prefix.into(),
            webui_dir,
            prefer_ext,
            resolved: DashMap::new(),
        }
    }

    /// Object key for a file uploaded into `session_id`
    pub fn object_key(&self, session_id: &str, file_name: &str) -> String {
        format!(
            "{UPLOAD_PREFIX}{}_{}",
            sid_core(session_id, &self.session_prefix),
            strip_upload_prefix(file_name)
        )
    }

    /// Store a directly posted file
    pub async fn store_upload(
        &self,
        session_id: &str,
        file_name: &str,
        data: Bytes,
    ) -> Result<String, UploadError> {
        if session_id.is_empty() {
            return Err(UploadError::MissingSession);
        }
        if strip_upload_prefix(file_name).is_empty() {
            return Err(UploadError::MissingFile);
        }
        let object = self.object_key(session_id, file_name);
        let size = data.len();
        self.store.put(&object, data).await?;
        info!(session_id, object = %object, size, "Upload stored");
        Ok(object)
    }

    /// Copy a front-end attachment into the store.
    ///
    /// `filename` matches exactly first, then as the `<anything>_<filename>`
    /// name the front end saves it under. Without a name the newest file is
    /// taken, narrowed to `prefer_ext` when any file has that extension. An
    /// object that already exists is reused, not rewritten.
    pub async fn ingest(
        &self,
        session_id: &str,
        filename: Option<&str>,
        prefer_ext: Option<&str>,
    ) -> Result<Ingested, UploadError> {
        if session_id.is_empty() {
            return Err(UploadError::MissingSession);
        }
        let dir = self.webui_dir.as_deref().ok_or(UploadError::Unconfigured)?;
        let source = find_source(dir, filename, prefer_ext).await?;
        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let object = self.object_key(session_id, &source_name);

        // A failed existence check still tries the copy
        if self.store.exists(&object).await.unwrap_or(false) {
            debug!(session_id, object = %object, "Upload already ingested");
            return Ok(Ingested {
                object,
                source: source_name,
                exists: true,
            });
        }

        let data = tokio::fs::read(&source).await?;
        self.store.put(&object, Bytes::from(data)).await?;
        info!(session_id, object = %object, source = %source_name, "Upload ingested");
        Ok(Ingested {
            object,
            source: source_name,
            exists: false,
        })
    }

    /// Object key for the first candidate name that ingests.
    ///
    /// With no match among `names`, the newest upload is taken. Results are
    /// cached per session and name.
    pub async fn resolve(&self, session_id: &str, names: &[String]) -> Option<String> {
        self.webui_dir.as_ref()?;

        for name in names {
            if let Some(object) = self
                .cached_ingest(session_id, Some(name.as_str()), None, name.clone())
                .await
            {
                return Some(object);
            }
        }
        let prefer_ext = self.prefer_ext.as_deref();
        let auto = format!("{AUTO_PICK}:{}", prefer_ext.unwrap_or_default());
        self.cached_ingest(session_id, None, prefer_ext, auto).await
    }

    /// Drop cached resolutions for a purged session
    pub fn forget(&self, session_id: &str) {
        self.resolved.retain(|(sid, _), _| sid != session_id);
    }

    async fn cached_ingest(
        &self,
        session_id: &str,
        filename: Option<&str>,
        prefer_ext: Option<&str>,
        cache_name: String,
    ) -> Option<String> {
        let cache_key = (session_id.to_string(), cache_name);
        if let Some(object) = self.resolved.get(&cache_key) {
            return Some(object.value().clone());
        }
        match self.ingest(session_id, filename, prefer_ext).await {
            Ok(found) => {
                self.resolved.insert(cache_key, found.object.clone());
                Some(found.object)
            }
            Err(e) => {
                debug!(session_id, name = %cache_key.1, error = %e, "Upload not resolved");
                None
            }
        }
    }
}

async fn find_source(
    dir: &Path,
    filename: Option<&str>,
    prefer_ext: Option<&str>,
) -> Result<PathBuf, UploadError> {
    let Some(filename) = filename else {
        let files = list_files(dir).await?;
        if files.is_empty() {
            return Err(UploadError::NotFound(format!("no file found in {}", dir.display())));
        }
        let preferred = prefer_ext.map(|ext| ext.trim_start_matches('.').to_lowercase());
        let with_ext = preferred.and_then(|ext| {
            newest(files.iter().filter(|(path, _)| {
                path.extension()
                    .is_some_and(|e| e.to_string_lossy().to_lowercase() == ext)
            }))
        });
        return with_ext
            .or_else(|| newest(files.iter()))
            .ok_or_else(|| UploadError::NotFound("file not found (no match)".to_string()));
    };

    if !Path::new(filename)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(UploadError::InvalidScope);
    }

    let requested = dir.join(filename);
    if tokio::fs::metadata(&requested)
        .await
        .is_ok_and(|m| m.is_file())
    {
        return Ok(requested);
    }

    let suffix = format!("_{filename}");
    let files = list_files(dir).await?;
    newest(files.iter().filter(|(path, _)| {
        path.file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(&suffix))
    }))
    .ok_or_else(|| UploadError::NotFound("file not found (no match)".to_string()))
}

/// Regular files in `dir` with their modification times
async fn list_files(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>, UploadError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if meta.is_file() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((entry.path(), modified));
        }
    }
    Ok(files)
}

fn newest<'a>(files: impl Iterator<Item = &'a (PathBuf, SystemTime)>) -> Option<PathBuf> {
    files
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path.clone())
}
