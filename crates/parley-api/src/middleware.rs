use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use parley_gateway::ChatError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the bearer token; handlers read the caller from the
/// `Claims` extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(ChatError::Unauthenticated)?;

    let claims = state.auth.verify(bearer.token())?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
