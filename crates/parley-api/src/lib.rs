pub mod auth;
pub mod error;
pub mod files;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod rooms;
pub mod routes;
pub mod storage;
pub mod users;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
pub use storage::BlobStore;
