use axum::{Extension, Json, extract::State, response::IntoResponse};

use parley_db::ChatStore;
use parley_types::api::Claims;

use crate::auth::{AppState, with_db};
use crate::error::ApiError;

/// Everyone the caller could open a room with.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let users = with_db(&state, move |db| db.list_users(caller)).await?;
    Ok(Json(users))
}
