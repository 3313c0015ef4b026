//! Per-connection protocol dispatch.
//!
//! Interprets decoded envelopes, mutates the registry, and triggers room
//! broadcasts. Every drop path is silent toward the sender: malformed
//! frames, joins with empty fields, and chat/leave without a recorded
//! membership all vanish with a debug log and no state change.

use std::sync::Arc;

use roomcast_core::{now_ms, ConnectionId, Envelope, SystemEvent};
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::registry::{Membership, RoomRegistry};

/// Drives one connection's Unbound → Bound → Unbound lifecycle from the
/// frames it sends, and the terminal cleanup when its transport closes.
pub struct ProtocolHandler {
    registry: Arc<RoomRegistry>,
    broadcaster: Broadcaster,
}

impl ProtocolHandler {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        Self {
            registry,
            broadcaster,
        }
    }

    /// Handle one inbound text frame from `id`.
    pub fn handle_frame(&self, id: &ConnectionId, raw: &str) {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(conn_id = %id, error = %e, "dropped undecodable frame");
                return;
            }
        };

        match envelope {
            Envelope::Join { room_id, user } => self.handle_join(id, room_id, user),
            Envelope::Leave { .. } => self.handle_leave(id),
            Envelope::Chat { message, .. } => self.handle_chat(id, message),
            // Only the server originates system envelopes.
            Envelope::System { .. } => {
                debug!(conn_id = %id, "ignored client-sent system envelope");
            }
        }
    }

    /// Transport closed: clear membership and notify the vacated room.
    /// Safe to call more than once; only the first call broadcasts.
    pub fn handle_disconnect(&self, id: &ConnectionId) {
        let Some((Membership { room_id, user }, online)) = self.registry.remove(id) else {
            return;
        };
        debug!(conn_id = %id, room_id = %room_id, online, "member disconnected");
        self.broadcaster.broadcast(
            &room_id,
            &Envelope::System {
                event: SystemEvent::Disconnect,
                user,
                room_id: room_id.clone(),
                online,
                ts: now_ms(),
            },
        );
    }

    fn handle_join(&self, id: &ConnectionId, room_id: String, user: String) {
        if room_id.is_empty() || user.is_empty() {
            debug!(conn_id = %id, "dropped join with missing fields");
            return;
        }
        let Some(online) = self.registry.join(id, &room_id, &user) else {
            return;
        };
        self.broadcaster.broadcast(
            &room_id,
            &Envelope::System {
                event: SystemEvent::Join,
                user,
                room_id: room_id.clone(),
                online,
                ts: now_ms(),
            },
        );
    }

    fn handle_leave(&self, id: &ConnectionId) {
        // Leave is driven entirely by the recorded membership; the
        // envelope's own roomId/user are not trusted.
        let Some((Membership { room_id, user }, online)) = self.registry.leave(id) else {
            debug!(conn_id = %id, "dropped leave without membership");
            return;
        };
        self.broadcaster.broadcast(
            &room_id,
            &Envelope::System {
                event: SystemEvent::Leave,
                user,
                room_id: room_id.clone(),
                online,
                ts: now_ms(),
            },
        );
    }

    fn handle_chat(&self, id: &ConnectionId, message: String) {
        let Some(Membership { room_id, user }) = self.registry.membership(id) else {
            debug!(conn_id = %id, "dropped chat without membership");
            return;
        };
        // Room and user come from the registry, never from the inbound
        // envelope, so a client cannot speak as someone else.
        self.broadcaster.broadcast(
            &room_id,
            &Envelope::Chat {
                room_id: room_id.clone(),
                user,
                message,
                ts: now_ms(),
            },
        );
    }
}
