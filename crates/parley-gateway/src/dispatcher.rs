use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::ConnectionId;
use crate::presence::{Arrival, Departure, PresenceRegistry};
use crate::rooms::RoomRouter;

/// Receiving half of one connection's outbound queue.
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Manages all connected clients and fans events out to them.
///
/// Every method takes the hub lock once and never awaits while holding it.
/// Sends happen under the lock, so events emitted for one room reach each
/// subscriber's queue in emission order.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Mutex<Hub>>,
}

#[derive(Default)]
struct Hub {
    peers: HashMap<ConnectionId, Peer>,
    presence: PresenceRegistry,
    rooms: RoomRouter,
}

struct Peer {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<Arc<ServerEvent>>,
}

impl Hub {
    fn deliver(&self, conn_id: ConnectionId, event: &Arc<ServerEvent>) -> bool {
        match self.peers.get(&conn_id) {
            // A closed receiver means the connection is shutting down.
            Some(peer) => peer.tx.send(event.clone()).is_ok(),
            None => false,
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        // Hub maps stay consistent even if a holder panicked mid-send.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a live connection for `user_id`. Returns its id and queue.
    pub fn register(&self, user_id: Uuid) -> (ConnectionId, EventReceiver) {
        let conn_id = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub().peers.insert(conn_id, Peer { user_id, tx });
        debug!("{} registered for user {}", conn_id, user_id);
        (conn_id, rx)
    }

    /// Drop a connection and all of its room subscriptions.
    /// Presence is left to the caller, which has to persist it.
    pub fn unregister(&self, conn_id: ConnectionId) -> Option<Uuid> {
        let mut hub = self.hub();
        let peer = hub.peers.remove(&conn_id)?;
        let left = hub.rooms.leave_all(conn_id);
        debug!("{} unregistered, left {} rooms", conn_id, left.len());
        Some(peer.user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.hub().peers.len()
    }

    // -- Delivery --

    /// Send a targeted event to one connection.
    pub fn send_to(&self, conn_id: ConnectionId, event: ServerEvent) -> bool {
        self.hub().deliver(conn_id, &Arc::new(event))
    }

    /// Deliver to exactly the current subscribers of `room_id`.
    #[cfg(test)]
    pub fn broadcast(&self, room_id: Uuid, event: ServerEvent) -> usize {
        self.broadcast_filtered(room_id, event, None, None)
    }

    /// Deliver to the room's subscribers and make sure `origin` gets a copy
    /// even if it never joined the room.
    pub fn broadcast_with_echo(
        &self,
        room_id: Uuid,
        origin: Option<ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        self.broadcast_filtered(room_id, event, origin, None)
    }

    /// Deliver to the room's subscribers other than `except`.
    pub fn broadcast_except(&self, room_id: Uuid, except: ConnectionId, event: ServerEvent) -> usize {
        self.broadcast_filtered(room_id, event, None, Some(except))
    }

    fn broadcast_filtered(
        &self,
        room_id: Uuid,
        event: ServerEvent,
        echo: Option<ConnectionId>,
        except: Option<ConnectionId>,
    ) -> usize {
        let event = Arc::new(event);
        let hub = self.hub();
        let mut targets = hub.rooms.subscribers_of(room_id);
        if let Some(conn_id) = echo {
            targets.insert(conn_id);
        }
        if let Some(conn_id) = except {
            targets.remove(&conn_id);
        }

        targets
            .into_iter()
            .filter(|conn_id| hub.deliver(*conn_id, &event))
            .count()
    }

    /// Deliver to every connection, whatever rooms it joined.
    pub fn broadcast_global(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let hub = self.hub();
        hub.peers
            .values()
            .filter(|peer| peer.tx.send(event.clone()).is_ok())
            .count()
    }

    // -- Room membership --

    pub fn join(&self, conn_id: ConnectionId, room_id: Uuid) -> bool {
        self.hub().rooms.join(conn_id, room_id)
    }

    pub fn leave(&self, conn_id: ConnectionId, room_id: Uuid) -> bool {
        self.hub().rooms.leave(conn_id, room_id)
    }

    #[cfg(test)]
    pub fn subscribers_of(&self, room_id: Uuid) -> std::collections::HashSet<ConnectionId> {
        self.hub().rooms.subscribers_of(room_id)
    }

    pub fn is_subscribed(&self, conn_id: ConnectionId, room_id: Uuid) -> bool {
        self.hub().rooms.is_subscribed(conn_id, room_id)
    }

    // -- Presence --

    pub fn mark_online(&self, conn_id: ConnectionId, user_id: Uuid) -> Arrival {
        self.hub().presence.mark_online(conn_id, user_id)
    }

    pub fn mark_offline(&self, conn_id: ConnectionId) -> Option<Departure> {
        self.hub().presence.mark_offline(conn_id)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.hub().presence.is_online(user_id)
    }

    /// Online users, sorted for stable output.
    pub fn online_users(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self.hub().presence.snapshot().into_iter().collect();
        users.sort();
        users
    }
}
