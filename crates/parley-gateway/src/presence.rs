use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::ConnectionId;

/// Result of registering a connection as online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// First live connection of the user: announce them.
    CameOnline,
    /// The user already had another live connection.
    AlreadyOnline,
    /// This connection was already registered.
    Unchanged,
}

/// Result of removing a connection's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user_id: Uuid,
    /// True when this was the user's last live connection.
    pub went_offline: bool,
}

/// Connection -> user map with a live-connection count per user.
///
/// A user stays online until every one of their connections is gone, so a
/// closing tab never reports a user offline while another tab is open.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: HashMap<ConnectionId, Uuid>,
    live: HashMap<Uuid, usize>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_online(&mut self, conn_id: ConnectionId, user_id: Uuid) -> Arrival {
        if self.connections.contains_key(&conn_id) {
            return Arrival::Unchanged;
        }
        self.connections.insert(conn_id, user_id);

        let count = self.live.entry(user_id).or_insert(0);
        *count += 1;
        if *count == 1 {
            Arrival::CameOnline
        } else {
            Arrival::AlreadyOnline
        }
    }

    /// No-op (returns `None`) for connections that never went online.
    pub fn mark_offline(&mut self, conn_id: ConnectionId) -> Option<Departure> {
        let user_id = self.connections.remove(&conn_id)?;

        let went_offline = match self.live.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            _ => {
                self.live.remove(&user_id);
                true
            }
        };

        Some(Departure {
            user_id,
            went_offline,
        })
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.live.contains_key(&user_id)
    }

    pub fn snapshot(&self) -> HashSet<Uuid> {
        self.live.keys().copied().collect()
    }

    #[cfg(test)]
    pub fn live_connections(&self, user_id: Uuid) -> usize {
        self.live.get(&user_id).copied().unwrap_or(0)
    }
}
