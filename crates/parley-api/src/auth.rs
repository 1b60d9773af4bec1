use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info};
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::{Authenticator, ChatError, Gateway};
use parley_types::api::{AuthResponse, LoginRequest, RegisterRequest};

use crate::error::ApiError;
use crate::storage::BlobStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub gateway: Gateway,
    pub auth: Authenticator,
    pub blobs: BlobStore,
    pub max_upload_bytes: usize,
}

impl AppStateInner {
    /// The gateway shares the database as its store, so REST writes and
    /// realtime events go through one system of record.
    pub fn new(
        db: Arc<Database>,
        auth: Authenticator,
        blobs: BlobStore,
        max_upload_bytes: usize,
    ) -> AppState {
        Arc::new(Self {
            gateway: Gateway::new(db.clone()),
            db,
            auth,
            blobs,
            max_upload_bytes,
        })
    }
}

/// Run blocking work (SQLite, Argon2) off the async runtime.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Chat(ChatError::Internal)
    })?
}

pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> parley_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    blocking(move || f(&db).map_err(ApiError::from)).await
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let name_len = req.name.trim().chars().count();
    if name_len == 0 || name_len > 64 {
        return Err(ChatError::Validation("name must be 1-64 characters".into()).into());
    }
    if !req.email.contains('@') {
        return Err(ChatError::Validation("email address is invalid".into()).into());
    }
    if req.password.len() < 8 {
        return Err(ChatError::Validation("password must be at least 8 characters".into()).into());
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&req)?;

    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();

    // Check if the email is taken
    let lookup = email.clone();
    if with_db(&state, move |db| db.get_user_by_email(&lookup))
        .await?
        .is_some()
    {
        return Err(ChatError::Conflict("email is already registered".into()).into());
    }

    // Hash password with Argon2id
    let password = req.password;
    let password_hash = blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                error!("Password hashing failed: {}", e);
                ApiError::Chat(ChatError::Internal)
            })
    })
    .await?;

    let user_id = Uuid::new_v4();
    let user = with_db(&state, move |db| {
        db.create_user(user_id, &name, &email, &password_hash)
    })
    .await?;

    let token = state.auth.issue(user.id, &user.name)?;
    info!("Registered user {} ({})", user.name, user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id: user.id,
            name: user.name,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = with_db(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ChatError::Unauthenticated)?;

    // Verify password
    let password = req.password;
    let stored_hash = user.password.clone();
    blocking(move || {
        let parsed_hash = PasswordHash::new(&stored_hash).map_err(|e| {
            error!("Stored password hash is unreadable: {}", e);
            ApiError::Chat(ChatError::Internal)
        })?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::Chat(ChatError::Unauthenticated))
    })
    .await?;

    let user = user.into_user()?;
    let token = state.auth.issue(user.id, &user.name)?;

    Ok(Json(AuthResponse {
        user_id: user.id,
        name: user.name,
        token,
    }))
}
