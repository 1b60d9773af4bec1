use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid input: {0}")]
    Invalid(String),

    /// A unique column already holds the value.
    #[error("{0}")]
    Conflict(&'static str),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("DB lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
