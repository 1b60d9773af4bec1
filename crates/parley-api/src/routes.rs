use axum::{
    Router,
    extract::{Query, Request, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use parley_gateway::connection;

use crate::auth::{self, AppState};
use crate::error::ApiError;
use crate::middleware::require_auth;
use crate::{files, messages, reactions, rooms, users};

/// The full HTTP surface: auth, the user directory, rooms, messages, reactions, attachments,
/// stored files and the realtime gateway.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/rooms/{room_id}/read", post(rooms::mark_read))
        .route("/rooms/{room_id}/participant", patch(rooms::update_participant))
        .route("/rooms/{room_id}/attachments", post(files::upload_attachment))
        .route(
            "/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/files", ServeDir::new(state.blobs.root()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

/// Method and path only. The query is left out because `/gateway` accepts
/// its token there.
fn request_span(req: &Request) -> tracing::Span {
    tracing::debug_span!("request", method = %req.method(), path = %req.uri().path())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// A token in the query string or `Authorization` header is checked before
/// the upgrade, and before the upgrade headers themselves. Without one, the
/// socket must `identify` itself first.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let token = query.token.or_else(|| {
        headers
            .typed_get::<Authorization<Bearer>>()
            .map(|bearer| bearer.token().to_string())
    });
    let claims = token.map(|token| state.auth.verify(&token)).transpose()?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let gateway = state.gateway.clone();
    let response = match claims {
        Some(claims) => {
            ws.on_upgrade(move |socket| {
                connection::handle_connection_authenticated(socket, gateway, claims.sub, claims.name)
            })
        }
        None => {
            let auth = state.auth.clone();
            ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway, auth))
        }
    };

    Ok(response.into_response())
}
