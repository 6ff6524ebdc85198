use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::Principal,
    error::{AppError, AppResult, ServiceError},
    ingest::{accept_upload, Upload},
    models::Resource,
    state::AppState,
    storage::StorageError,
};

/// Client view of a resource. Tenant and storage location never leave the server.
#[derive(Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
    pub status: String,
    pub owner_id: Uuid,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub metadata: Option<Value>,
}

impl From<Resource> for FileResponse {
    fn from(resource: Resource) -> Self {
        Self {
            id: resource.id,
            filename: resource.display_name,
            size: resource.size_bytes,
            mime_type: resource.mime_type,
            status: resource.status,
            owner_id: resource.owner_id,
            created_at: to_iso(resource.created_at),
            processed_at: resource.processed_at.map(to_iso),
            metadata: resource.metadata,
        }
    }
}

#[derive(Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
}

pub async fn list_files(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<FileListResponse>> {
    let files = state
        .resources
        .scoped_list(&principal)?
        .into_iter()
        .map(FileResponse::from)
        .collect();
    Ok(Json(FileListResponse { files }))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    principal: Principal,
) -> AppResult<Json<FileResponse>> {
    let resource = state.resources.scoped_get(file_id, &principal)?;
    Ok(Json(resource.into()))
}

pub async fn upload_file(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<FileResponse>)> {
    let mut upload: Option<Upload> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(|n| n.to_string()).unwrap_or_default();
        let content_type = field.content_type().map(|mime| mime.to_string());
        let bytes = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read file bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        upload = Some(Upload {
            file_name,
            content_type,
            bytes,
        });
    }

    let upload = upload.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let resource = accept_upload(&state, &principal, upload)
        .await
        .map_err(|err| {
            warn!(user_id = %principal.user_id, error = %err, "upload rejected");
            err
        })?;

    Ok((StatusCode::ACCEPTED, Json(resource.into())))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    principal: Principal,
) -> AppResult<impl IntoResponse> {
    let resource = state.resources.scoped_get(file_id, &principal)?;
    let bytes = match state
        .storage
        .read(resource.tenant_id, &resource.storage_key)
        .await
    {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound) => {
            warn!(resource_id = %resource.id, "stored bytes missing for live resource");
            return Err(AppError::not_found());
        }
        Err(err) => return Err(ServiceError::from(err).into()),
    };

    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&resource.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(disposition) = attachment_content_disposition(&resource.display_name)
        .and_then(|value| HeaderValue::from_str(&value).ok())
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok((headers, bytes))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    principal: Principal,
) -> AppResult<StatusCode> {
    let resource = state.resources.soft_delete(file_id, &principal)?;

    if let Err(err) = state
        .storage
        .delete(resource.tenant_id, &resource.storage_key)
        .await
    {
        warn!(resource_id = %resource.id, error = %err, "failed to remove deleted file bytes");
    }

    info!(resource_id = %resource.id, user_id = %principal.user_id, "deleted file");
    Ok(StatusCode::NO_CONTENT)
}

fn attachment_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if !ch.is_ascii() => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(filename, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "attachment; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}"
    ))
}

fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
