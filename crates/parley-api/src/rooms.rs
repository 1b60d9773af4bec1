use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_db::ChatStore;
use parley_gateway::ChatError;
use parley_types::api::{Claims, CreateRoomRequest, UpdateParticipantRequest};
use parley_types::models::ParticipantFlag;

use crate::auth::{AppState, with_db};
use crate::error::ApiError;

/// Room-scoped routes require the caller to be a participant.
pub(crate) async fn ensure_participant(
    state: &AppState,
    room_id: Uuid,
    user_id: Uuid,
) -> Result<(), ApiError> {
    if with_db(state, move |db| db.is_participant(room_id, user_id)).await? {
        Ok(())
    } else {
        Err(ChatError::not_participant().into())
    }
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let rooms = with_db(&state, move |db| db.find_rooms_for_user(user_id)).await?;
    Ok(Json(rooms))
}

/// Direct rooms are deduplicated: asking again for the same pair returns
/// the existing room.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let creator = claims.sub;
    let room_type = req.room_type;
    let others = req.participant_ids;

    let room = with_db(&state, move |db| db.create_room(room_type, creator, &others)).await?;
    info!(
        "{} ({}) opened {} room {}",
        claims.name,
        creator,
        room_type.as_str(),
        room.room.id
    );

    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    ensure_participant(&state, room_id, user_id).await?;

    let participant = with_db(&state, move |db| db.mark_read(room_id, user_id)).await?;
    Ok(Json(participant))
}

/// Update the caller's own archived/muted flags in a room.
pub async fn update_participant(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateParticipantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    ensure_participant(&state, room_id, user_id).await?;

    if req.is_archived.is_none() && req.is_muted.is_none() {
        return Err(ChatError::Validation("nothing to update".into()).into());
    }

    let participant = with_db(&state, move |db| {
        let mut participant = db.participant_for(room_id, user_id)?;
        if let Some(value) = req.is_archived {
            participant = db.set_participant_flag(participant.id, ParticipantFlag::Archived, value)?;
        }
        if let Some(value) = req.is_muted {
            participant = db.set_participant_flag(participant.id, ParticipantFlag::Muted, value)?;
        }
        Ok(participant)
    })
    .await?;

    Ok(Json(participant))
}
