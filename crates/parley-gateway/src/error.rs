use parley_db::DbError;
use thiserror::Error;

/// Failure of one request or inbound event. Never fatal to the process.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Persistence(#[source] DbError),

    #[error("internal error")]
    Internal,
}

impl ChatError {
    /// Stable machine-readable code, used in `error` events and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Persistence(_) => "persistence",
            Self::Internal => "internal",
        }
    }

    pub fn not_participant() -> Self {
        Self::Forbidden("not a participant of this room".into())
    }
}

impl From<DbError> for ChatError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => Self::NotFound(what),
            DbError::Invalid(reason) => Self::Validation(reason),
            DbError::Conflict(reason) => Self::Conflict(reason.to_string()),
            other => Self::Persistence(other),
        }
    }
}
