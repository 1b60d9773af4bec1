use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::ChatStore;
use parley_types::api::{Claims, SendMessageRequest};

use crate::auth::{AppState, with_db};
use crate::error::ApiError;
use crate::rooms::ensure_participant;

/// Proxy to the gateway's send path: same validation, same persistence,
/// same `message:new` broadcast as a realtime `message:send`.
pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .gateway
        .send_message(claims.sub, None, room_id, req.content, req.attachment)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Full history, oldest first. Clients call this on (re)join to fill any
/// gap left while they were disconnected.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_participant(&state, room_id, claims.sub).await?;

    let messages = with_db(&state, move |db| db.list_messages(room_id)).await?;
    Ok(Json(messages))
}
