//! Envelope fan-out to a room's member connections.

use std::sync::Arc;

use roomcast_core::Envelope;
use tracing::{debug, warn};

use crate::registry::RoomRegistry;

/// Delivers one envelope to every open member of a room.
///
/// The payload is serialized once and each member gets an independent,
/// non-blocking send into its own outbound queue. A member whose transport
/// is closed or backed up is skipped, never removed (removal belongs to the
/// leave/close path), and never delays the others.
pub struct Broadcaster {
    registry: Arc<RoomRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Best-effort delivery of `envelope` to all current members of
    /// `room_id`. No ordering guarantee across recipients.
    pub fn broadcast(&self, room_id: &str, envelope: &Envelope) {
        let frame = match envelope.encode() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(room_id, error = %e, "failed to serialize envelope");
                return;
            }
        };
        let members = self.registry.members(room_id);
        debug!(room_id, recipients = members.len(), "broadcast to room");
        for conn in members {
            if !conn.send(Arc::clone(&frame)) {
                debug!(conn_id = %conn.id, room_id, "skipped member, transport not open");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientConnection;
    use roomcast_core::{ConnectionId, SystemEvent};
    use tokio::sync::mpsc;

    fn member(
        registry: &RoomRegistry,
        raw: &str,
        room: &str,
    ) -> (ConnectionId, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let id = ConnectionId::from_raw(raw);
        registry.register(Arc::new(ClientConnection::new(id.clone(), tx)));
        let _ = registry.join(&id, room, raw);
        (id, rx)
    }

    fn chat(room: &str) -> Envelope {
        Envelope::Chat {
            room_id: room.into(),
            user: "alice".into(),
            message: "hi".into(),
            ts: 1,
        }
    }

    #[tokio::test]
    async fn reaches_every_member() {
        let registry = Arc::new(RoomRegistry::new());
        let (_c1, mut rx1) = member(&registry, "c1", "r1");
        let (_c2, mut rx2) = member(&registry, "c2", "r1");
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        broadcaster.broadcast("r1", &chat("r1"));

        let f1 = rx1.try_recv().unwrap();
        let f2 = rx2.try_recv().unwrap();
        // Serialized once: both members share the same frame.
        assert_eq!(f1, f2);
        assert!(f1.contains("\"type\":\"chat\""));
    }

    #[tokio::test]
    async fn excludes_other_rooms() {
        let registry = Arc::new(RoomRegistry::new());
        let (_c1, mut rx1) = member(&registry, "c1", "r1");
        let (_c2, mut rx2) = member(&registry, "c2", "r2");
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        broadcaster.broadcast("r1", &chat("r1"));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn skips_closed_member_without_removing_it() {
        let registry = Arc::new(RoomRegistry::new());
        let (c1, mut rx1) = member(&registry, "c1", "r1");
        let (_c2, mut rx2) = member(&registry, "c2", "r1");
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        for conn in registry.members("r1") {
            if conn.id == c1 {
                conn.mark_closed();
            }
        }
        drop(rx1);

        broadcaster.broadcast("r1", &chat("r1"));

        assert!(rx2.try_recv().is_ok());
        // The failed send does not evict the member.
        assert_eq!(registry.occupancy("r1"), 2);
    }

    #[tokio::test]
    async fn delivers_exactly_once_per_member() {
        let registry = Arc::new(RoomRegistry::new());
        let (_c1, mut rx1) = member(&registry, "c1", "r1");
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        broadcaster.broadcast("r1", &chat("r1"));

        assert!(rx1.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_room_is_a_noop() {
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = Broadcaster::new(registry);
        broadcaster.broadcast(
            "nobody",
            &Envelope::System {
                event: SystemEvent::Join,
                user: "alice".into(),
                room_id: "nobody".into(),
                online: 1,
                ts: 1,
            },
        );
    }
}
