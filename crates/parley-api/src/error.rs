use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use parley_db::DbError;
use parley_gateway::ChatError;
use parley_types::api::ErrorBody;

/// Error returned by every REST handler. Renders as
/// `{"error": <code>, "message": <text>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("attachment exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("blob storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        Self::Chat(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Chat(ChatError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            Self::Chat(ChatError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Self::Chat(ChatError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Chat(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Chat(ChatError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Chat(ChatError::Persistence(_) | ChatError::Internal) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Chat(err) => err.code(),
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Storage(_) => "persistence",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code().to_string();
        let message = if status.is_server_error() {
            // Details stay in the log.
            error!("Request failed: {:#}", anyhow::Error::new(self));
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: code,
            message,
        };
        (status, Json(body)).into_response()
    }
}
