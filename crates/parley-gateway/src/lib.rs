pub mod assistant;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod presence;
pub mod rooms;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use dispatcher::Dispatcher;
pub use error::ChatError;
pub use gateway::{Gateway, Session};
pub use identity::Authenticator;

/// Process-unique id of one live WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
