use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use parley_gateway::ChatError;
use parley_types::api::Claims;
use parley_types::models::Attachment;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::rooms::ensure_participant;
use crate::storage::BlobStore;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub name: Option<String>,
}

/// POST /rooms/{room_id}/attachments?name=... with the raw file as the body.
///
/// Returns the `Attachment` to embed in a following `message:send`.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    ensure_participant(&state, room_id, claims.sub).await?;

    let limit = state.max_upload_bytes;
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ApiError::PayloadTooLarge(limit));
    }

    let data = read_capped(body, limit).await?;
    if data.is_empty() {
        return Err(ChatError::Validation("attachment is empty".into()).into());
    }

    let name = query
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "file".to_string());
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let path = BlobStore::blob_path(room_id, &name, &data);
    let url = state
        .blobs
        .upload(&path, &data)
        .await
        .map_err(ApiError::Storage)?;

    info!(
        "{} ({}) uploaded {} ({} bytes) to room {}",
        claims.name,
        claims.sub,
        name,
        data.len(),
        room_id
    );

    Ok((
        StatusCode::CREATED,
        Json(Attachment {
            url,
            mime_type,
            name,
        }),
    ))
}

/// Collect the body, failing as soon as it grows past `limit`.
async fn read_capped(body: Body, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut stream = http_body_util::BodyStream::new(body);
    let mut buf = Vec::new();

    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| {
            warn!("Upload body interrupted: {}", e);
            ApiError::Chat(ChatError::Validation("upload body could not be read".into()))
        })?;

        if let Ok(data) = frame.into_data() {
            if buf.len() + data.len() > limit {
                return Err(ApiError::PayloadTooLarge(limit));
            }
            buf.extend_from_slice(&data);
        }
    }

    Ok(buf)
}
