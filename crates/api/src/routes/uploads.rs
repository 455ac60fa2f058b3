//! File uploads
//!
//! Files live under `UPLOAD_DIR`, outside the application tree, as
//! `<uuid>-<sanitized original name>`. Only names that survive sanitization
//! unchanged are ever read back.

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use helpdesk_shared::ApiEnvelope;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const MAX_NAME_CHARS: usize = 100;

const ALLOWED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "pdf", "txt", "csv", "log", "doc", "docx", "xls", "xlsx",
    "zip",
];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub original_name: String,
    pub url: String,
    pub size: usize,
    pub content_type: &'static str,
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Reduce a client-supplied name to a safe basename with an allowed extension
pub fn sanitize_filename(original: &str) -> Option<String> {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim_start_matches(['.', '-']).to_string();

    let ext = extension(&cleaned)?;
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }

    if cleaned.chars().count() <= MAX_NAME_CHARS {
        return Some(cleaned);
    }
    // Keep the extension when truncating
    let keep = MAX_NAME_CHARS - ext.len() - 1;
    let stem: String = cleaned.chars().take(keep).collect();
    Some(format!("{}.{}", stem, ext))
}

/// Whether `name` has the exact shape of a stored upload
pub fn is_stored_name(name: &str) -> bool {
    let (Some(prefix), Some(rest)) = (name.get(..36), name.get(36..)) else {
        return false;
    };
    Uuid::parse_str(prefix).is_ok()
        && rest.starts_with('-')
        && sanitize_filename(&rest[1..]).as_deref() == Some(&rest[1..])
}

fn content_type_for(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt" | "log") => "text/plain; charset=utf-8",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

fn stored_path(state: &AppState, name: &str) -> Option<PathBuf> {
    is_stored_name(name).then(|| state.config.upload_dir.join(name))
}

/// Accept one `file` field from a multipart form
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<Json<ApiEnvelope<UploadResponse>>> {
    if !state.rate_limiter.check_upload(auth_user.user_id).await.allowed {
        return Err(ApiError::RateLimited);
    }

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart body".to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let sanitized = sanitize_filename(&original_name)
            .ok_or_else(|| ApiError::Validation("File type not allowed".to_string()))?;

        let bytes = field
            .bytes()
            .await
            .map_err(|_| ApiError::BadRequest("Upload failed".to_string()))?;
        if bytes.is_empty() {
            return Err(ApiError::Validation("File is empty".to_string()));
        }
        if bytes.len() > state.config.upload_max_bytes {
            return Err(ApiError::Validation("File is too large".to_string()));
        }

        let filename = format!("{}-{}", Uuid::new_v4(), sanitized);
        let path = state.config.upload_dir.join(&filename);

        let write = async {
            tokio::fs::create_dir_all(&state.config.upload_dir).await?;
            tokio::fs::write(&path, &bytes).await
        };
        if let Err(e) = write.await {
            tracing::error!(error = %e, "Failed to store upload");
            return Err(ApiError::Internal);
        }

        tracing::info!(
            user_id = %auth_user.user_id,
            filename = %filename,
            size = bytes.len(),
            "File uploaded"
        );

        return Ok(Json(ApiEnvelope::ok(UploadResponse {
            url: format!("/api/uploads/{}", filename),
            content_type: content_type_for(&filename),
            filename,
            original_name,
            size: bytes.len(),
        })));
    }

    Err(ApiError::Validation("Missing file field".to_string()))
}

/// Serve a stored upload
pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let path = stored_path(&state, &filename).ok_or(ApiError::NotFound)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound)?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&filename)),
    );
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=86400"),
    );

    Ok(response.into_response())
}
