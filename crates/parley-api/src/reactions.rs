use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{Claims, ToggleReactionRequest};

use crate::auth::AppState;
use crate::error::ApiError;

/// Toggle the caller's reaction. Responds with the updated message; room
/// subscribers get the same full map as `reaction:update`.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .gateway
        .toggle_reaction(claims.sub, None, message_id, req.emoji)
        .await?;

    Ok(Json(message))
}
