use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::ConnectionId;

/// Which connections receive which room's events.
///
/// Both directions are indexed so a closing connection can be removed from
/// every room without scanning them all.
#[derive(Debug, Default)]
pub struct RoomRouter {
    subscribers: HashMap<Uuid, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<Uuid>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the connection was already subscribed.
    pub fn join(&mut self, conn_id: ConnectionId, room_id: Uuid) -> bool {
        let added = self.subscribers.entry(room_id).or_default().insert(conn_id);
        self.joined.entry(conn_id).or_default().insert(room_id);
        added
    }

    /// Returns `false` if the connection was not subscribed.
    pub fn leave(&mut self, conn_id: ConnectionId, room_id: Uuid) -> bool {
        let removed = match self.subscribers.get_mut(&room_id) {
            Some(conns) => {
                let removed = conns.remove(&conn_id);
                if conns.is_empty() {
                    self.subscribers.remove(&room_id);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = self.joined.get_mut(&conn_id) {
            rooms.remove(&room_id);
            if rooms.is_empty() {
                self.joined.remove(&conn_id);
            }
        }

        removed
    }

    /// Unsubscribe a connection from everything. Returns the rooms it left.
    pub fn leave_all(&mut self, conn_id: ConnectionId) -> Vec<Uuid> {
        let rooms: Vec<Uuid> = self
            .joined
            .remove(&conn_id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();

        for room_id in &rooms {
            if let Some(conns) = self.subscribers.get_mut(room_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    self.subscribers.remove(room_id);
                }
            }
        }

        rooms
    }

    pub fn subscribers_of(&self, room_id: Uuid) -> HashSet<ConnectionId> {
        self.subscribers.get(&room_id).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, conn_id: ConnectionId, room_id: Uuid) -> bool {
        self.subscribers
            .get(&room_id)
            .is_some_and(|conns| conns.contains(&conn_id))
    }

    #[cfg(test)]
    pub fn rooms_of(&self, conn_id: ConnectionId) -> HashSet<Uuid> {
        self.joined.get(&conn_id).cloned().unwrap_or_default()
    }
}
