//! Upload endpoints
//!
//! POST /upload           - multipart form with `file`, `query` and `session_id`
//! POST /ingest/openwebui - `{session_id, filename?, prefer_ext?}`; copies a chat
//!                          front-end attachment into the store

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::server::uploads::UploadError;
use crate::server::AppState;

/// Stored upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_path: String,
    pub query: String,
    pub session_id: String,
}

/// Ingest request
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub session_id: String,
    /// Attachment name, with or without the front end's prefix; omitted picks the newest
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub prefer_ext: Option<String>,
}

/// Ingest result
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub bucket: String,
    pub object: String,
    pub source: String,
    pub exists: bool,
}

fn status_for(err: &UploadError) -> StatusCode {
    match err {
        UploadError::MissingSession | UploadError::MissingFile | UploadError::InvalidScope => {
            StatusCode::BAD_REQUEST
        }
        UploadError::NotFound(_) => StatusCode::NOT_FOUND,
        UploadError::Unconfigured | UploadError::Io(_) | UploadError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, Json<Value>)> {
    let detail = |status: StatusCode, msg: String| (status, Json(json!({ "detail": msg })));

    let mut file: Option<(String, Bytes)> = None;
    let mut query = String::new();
    let mut session_id = String::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| detail(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| detail(StatusCode::BAD_REQUEST, e.to_string()))?;
                file = Some((file_name, data));
            }
            "query" | "session_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| detail(StatusCode::BAD_REQUEST, e.to_string()))?;
                if name == "query" {
                    query = text;
                } else {
                    session_id = text;
                }
            }
            _ => {}
        }
    }

    let Some((file_name, data)) = file else {
        return Err(detail(StatusCode::BAD_REQUEST, UploadError::MissingFile.to_string()));
    };
    let file_path = state
        .uploads
        .store_upload(&session_id, &file_name, data)
        .await
        .map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Upload failed");
            detail(status_for(&e), format!("upload failed: {e}"))
        })?;

    Ok(Json(UploadResponse {
        file_path,
        query,
        session_id,
    }))
}

async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<Value>)> {
    let ingested = state
        .uploads
        .ingest(
            &request.session_id,
            request.filename.as_deref().filter(|f| !f.is_empty()),
            request.prefer_ext.as_deref().filter(|e| !e.is_empty()),
        )
        .await
        .map_err(|e| {
            let status = status_for(&e);
            if status.is_server_error() {
                warn!(session_id = %request.session_id, error = %e, "Ingest failed");
            }
            (status, Json(json!({ "ok": false, "msg": e.to_string() })))
        })?;

    Ok(Json(IngestResponse {
        ok: true,
        bucket: state.config.storage.bucket.clone(),
        object: ingested.object,
        source: ingested.source,
        exists: ingested.exists,
    }))
}

/// Upload routes
pub fn uploads_routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .route("/ingest/openwebui", post(ingest))
}
