//! Authoritative mapping of connections to rooms and user identities.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use roomcast_core::ConnectionId;
use tracing::debug;

use crate::connection::ClientConnection;

/// What a connection joined as: `(room_id, user)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Membership {
    pub room_id: String,
    pub user: String,
}

#[derive(Default)]
struct RegistryInner {
    /// Every live connection, bound to a room or not.
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    /// Room id → member set. A room exists exactly while it has members.
    rooms: HashMap<String, HashSet<ConnectionId>>,
    /// Connection → its one recorded membership.
    memberships: HashMap<ConnectionId, Membership>,
}

/// Registry of connections and room membership.
///
/// All mutations and the occupancy reads they feed go through one lock, so
/// the `online` count attached to a membership event is exactly the member
/// count produced by that event, with no torn reads across the two maps.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<RegistryInner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection (not yet in any room).
    pub fn register(&self, conn: Arc<ClientConnection>) {
        let mut inner = self.inner.lock();
        let _ = inner.connections.insert(conn.id.clone(), conn);
    }

    /// Put a connection into a room under the given user identity.
    ///
    /// Returns the room's occupancy after the join, or `None` if the
    /// connection is no longer tracked (close raced the join). A prior
    /// membership in another room is detached first: a connection is a
    /// member of at most one room.
    pub fn join(&self, id: &ConnectionId, room_id: &str, user: &str) -> Option<usize> {
        let mut inner = self.inner.lock();
        if !inner.connections.contains_key(id) {
            return None;
        }
        if let Some(prev) = inner.memberships.remove(id) {
            debug!(conn_id = %id, from = %prev.room_id, to = room_id, "rejoin detaches prior room");
            let _ = remove_member(&mut inner.rooms, &prev.room_id, id);
        }
        let set = inner.rooms.entry(room_id.to_owned()).or_default();
        let _ = set.insert(id.clone());
        let online = set.len();
        let _ = inner.memberships.insert(
            id.clone(),
            Membership {
                room_id: room_id.to_owned(),
                user: user.to_owned(),
            },
        );
        Some(online)
    }

    /// Clear a connection's membership, keeping the connection tracked.
    ///
    /// Returns the prior membership and the room's post-removal occupancy,
    /// or `None` (no-op) if the connection had no recorded membership.
    pub fn leave(&self, id: &ConnectionId) -> Option<(Membership, usize)> {
        let mut inner = self.inner.lock();
        let membership = inner.memberships.remove(id)?;
        let online = remove_member(&mut inner.rooms, &membership.room_id, id);
        Some((membership, online))
    }

    /// Transport-close cleanup: untrack the connection and clear its
    /// membership. Idempotent: a second call returns `None` and mutates
    /// nothing.
    pub fn remove(&self, id: &ConnectionId) -> Option<(Membership, usize)> {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.connections.remove(id) {
            conn.mark_closed();
        }
        let membership = inner.memberships.remove(id)?;
        let online = remove_member(&mut inner.rooms, &membership.room_id, id);
        Some((membership, online))
    }

    /// A connection's current membership, if any.
    pub fn membership(&self, id: &ConnectionId) -> Option<Membership> {
        self.inner.lock().memberships.get(id).cloned()
    }

    /// Current member count of a room; 0 for rooms nobody is in.
    pub fn occupancy(&self, room_id: &str) -> usize {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Snapshot of a room's member connections, for fan-out.
    pub fn members(&self, room_id: &str) -> Vec<Arc<ClientConnection>> {
        let inner = self.inner.lock();
        let Some(ids) = inner.rooms.get(room_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.connections.get(id))
            .cloned()
            .collect()
    }

    /// Number of tracked connections (bound or not).
    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }
}

/// Drop `id` from a room's member set, garbage-collecting the room when it
/// empties. Returns the remaining occupancy.
fn remove_member(
    rooms: &mut HashMap<String, HashSet<ConnectionId>>,
    room_id: &str,
    id: &ConnectionId,
) -> usize {
    let Some(set) = rooms.get_mut(room_id) else {
        return 0;
    };
    let _ = set.remove(id);
    let remaining = set.len();
    if remaining == 0 {
        let _ = rooms.remove(room_id);
    }
    remaining
}
