//! Client connection state machine.
//!
//! Owns the WebSocket transport, tracks the current room/user sub-state,
//! sends outgoing envelopes, and dispatches local events to registered
//! observers. Sends while the transport is not open are silent no-ops;
//! the relay protocol never surfaces an error to the sender.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use roomcast_core::{now_ms, Envelope};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

/// Transport lifecycle, independent of room membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Local lifecycle events (not wire-transmitted).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
}

/// One inbound transport frame, delivered to message observers either as
/// the decoded envelope or, when it does not parse, as the raw text.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Parsed(Envelope),
    Raw(String),
}

/// Errors surfaced by [`RoomClient::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

type SystemObserver = Box<dyn Fn(&ClientEvent) + Send + Sync>;
type MessageObserver = Box<dyn Fn(&Inbound) + Send + Sync>;

/// Observer lists per event kind, invoked synchronously in registration
/// order on each dispatch. A panicking observer is caught and logged; the
/// rest still run.
#[derive(Default)]
pub(crate) struct Observers {
    system: Mutex<Vec<SystemObserver>>,
    message: Mutex<Vec<MessageObserver>>,
}

impl Observers {
    pub(crate) fn emit_system(&self, event: &ClientEvent) {
        for observer in self.system.lock().iter() {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!(?event, "system observer panicked");
            }
        }
    }

    pub(crate) fn emit_message(&self, inbound: &Inbound) {
        for observer in self.message.lock().iter() {
            if catch_unwind(AssertUnwindSafe(|| observer(inbound))).is_err() {
                error!("message observer panicked");
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LocalMembership {
    room_id: String,
    user: String,
}

/// Handle to the relay from the client side.
///
/// `Disconnected → Connecting → Connected → Disconnected`, with the
/// `{room_id, user}` sub-state recorded optimistically at
/// [`join_room`](Self::join_room) time, before any server acknowledgment.
pub struct RoomClient {
    server_url: String,
    state: Arc<Mutex<ConnectionState>>,
    membership: Mutex<Option<LocalMembership>>,
    outgoing_tx: Mutex<Option<mpsc::Sender<String>>>,
    observers: Arc<Observers>,
}

impl RoomClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            membership: Mutex::new(None),
            outgoing_tx: Mutex::new(None),
            observers: Arc::new(Observers::default()),
        }
    }

    /// Register an observer for local lifecycle events.
    pub fn on_system(&self, observer: impl Fn(&ClientEvent) + Send + Sync + 'static) {
        self.observers.system.lock().push(Box::new(observer));
    }

    /// Register an observer for inbound messages (parsed or raw).
    pub fn on_message(&self, observer: impl Fn(&Inbound) + Send + Sync + 'static) {
        self.observers.message.lock().push(Box::new(observer));
    }

    /// Open the transport.
    ///
    /// On success the client is `Connected` and a [`ClientEvent::Connected`]
    /// fires; reader and writer tasks run until the transport closes, at
    /// which point the state drops back to `Disconnected` and
    /// [`ClientEvent::Disconnected`] fires.
    pub async fn connect(&self) -> Result<(), ClientError> {
        *self.state.lock() = ConnectionState::Connecting;

        let (ws, _response) = match connect_async(&self.server_url).await {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.lock() = ConnectionState::Disconnected;
                self.observers.emit_system(&ClientEvent::Disconnected);
                return Err(ClientError::Connect(e));
            }
        };

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        *self.outgoing_tx.lock() = Some(out_tx);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        *self.state.lock() = ConnectionState::Connected;
        self.observers.emit_system(&ClientEvent::Connected);

        let state = Arc::clone(&self.state);
        let observers = Arc::clone(&self.observers);
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        // Always deliver; the payload shape is the only
                        // thing parse failure changes.
                        let inbound = match Envelope::decode(text.as_str()) {
                            Ok(envelope) => Inbound::Parsed(envelope),
                            Err(_) => Inbound::Raw(text.to_string()),
                        };
                        observers.emit_message(&inbound);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.lock() = ConnectionState::Disconnected;
            observers.emit_system(&ClientEvent::Disconnected);
        });

        Ok(())
    }

    /// Record the room/user sub-state and announce the join.
    pub fn join_room(&self, room_id: impl Into<String>, user: impl Into<String>) {
        let room_id = room_id.into();
        let user = user.into();
        *self.membership.lock() = Some(LocalMembership {
            room_id: room_id.clone(),
            user: user.clone(),
        });
        self.send(&Envelope::Join { room_id, user });
    }

    /// Announce the leave and clear the sub-state. No-op when not in a
    /// room. The recorded user identity is cleared along with the room id;
    /// nothing reads it after this point.
    pub fn leave_room(&self) {
        let Some(membership) = self.membership.lock().take() else {
            return;
        };
        self.send(&Envelope::Leave {
            room_id: membership.room_id,
            user: membership.user,
        });
    }

    /// Send a chat message to the current room. No-op when not in a room.
    pub fn send_chat(&self, message: impl Into<String>) {
        let Some(membership) = self.membership.lock().clone() else {
            debug!("send_chat without a joined room, dropped");
            return;
        };
        self.send(&Envelope::Chat {
            room_id: membership.room_id,
            user: membership.user,
            message: message.into(),
            ts: now_ms(),
        });
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Currently recorded `(room_id, user)` sub-state, if any.
    pub fn membership(&self) -> Option<(String, String)> {
        self.membership
            .lock()
            .as_ref()
            .map(|m| (m.room_id.clone(), m.user.clone()))
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Queue an envelope for the writer task. Silently dropped when the
    /// transport is not open, never an error across the async boundary.
    fn send(&self, envelope: &Envelope) {
        if *self.state.lock() != ConnectionState::Connected {
            debug!("transport not open, dropped outgoing envelope");
            return;
        }
        let Some(tx) = self.outgoing_tx.lock().clone() else {
            return;
        };
        match envelope.encode() {
            Ok(json) => {
                let _ = tx.try_send(json);
            }
            Err(e) => debug!(error = %e, "failed to encode outgoing envelope"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn initial_state() {
        let client = RoomClient::new("ws://localhost:9010/ws");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.membership().is_none());
        assert_eq!(client.server_url(), "ws://localhost:9010/ws");
    }

    #[test]
    fn join_room_records_membership_optimistically() {
        // Recorded before any server acknowledgment, even while offline.
        let client = RoomClient::new("ws://localhost:9010/ws");
        client.join_room("r1", "alice");
        assert_eq!(client.membership(), Some(("r1".into(), "alice".into())));
    }

    #[test]
    fn leave_room_clears_membership() {
        // The user identity goes away together with the room id.
        let client = RoomClient::new("ws://localhost:9010/ws");
        client.join_room("r1", "alice");
        client.leave_room();
        assert!(client.membership().is_none());
    }

    #[test]
    fn leave_room_without_membership_is_noop() {
        let client = RoomClient::new("ws://localhost:9010/ws");
        client.leave_room();
        assert!(client.membership().is_none());
    }

    #[test]
    fn offline_sends_are_silent_noops() {
        let client = RoomClient::new("ws://localhost:9010/ws");
        client.join_room("r1", "alice");
        client.send_chat("nobody hears this");
        client.leave_room();
        // Still functional afterwards.
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn rejoin_replaces_membership() {
        let client = RoomClient::new("ws://localhost:9010/ws");
        client.join_room("r1", "alice");
        client.join_room("r2", "alice");
        assert_eq!(client.membership(), Some(("r2".into(), "alice".into())));
    }

    #[test]
    fn observers_fire_in_registration_order() {
        let observers = Observers::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        observers.system.lock().push(Box::new(move |_| {
            first.lock().push(1);
        }));
        let second = Arc::clone(&order);
        observers.system.lock().push(Box::new(move |_| {
            second.lock().push(2);
        }));

        observers.emit_system(&ClientEvent::Connected);
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn panicking_observer_does_not_stop_the_rest() {
        let observers = Observers::default();
        let reached = Arc::new(AtomicUsize::new(0));

        observers.message.lock().push(Box::new(|_| {
            panic!("bad observer");
        }));
        let counter = Arc::clone(&reached);
        observers.message.lock().push(Box::new(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        }));

        observers.emit_message(&Inbound::Raw("payload".into()));
        observers.emit_message(&Inbound::Raw("again".into()));
        assert_eq!(reached.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn message_observer_sees_parsed_and_raw() {
        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        observers.message.lock().push(Box::new(move |inbound| {
            sink.lock().push(inbound.clone());
        }));

        let parsed = Inbound::Parsed(Envelope::Join {
            room_id: "r1".into(),
            user: "alice".into(),
        });
        observers.emit_message(&parsed);
        observers.emit_message(&Inbound::Raw("not json".into()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], parsed);
        assert_eq!(seen[1], Inbound::Raw("not json".into()));
    }

    #[tokio::test]
    async fn connect_to_unreachable_server_errors_and_stays_disconnected() {
        let client = RoomClient::new("ws://127.0.0.1:1/ws");
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        client.on_system(move |e| sink.lock().push(*e));

        let result = client.connect().await;
        assert!(result.is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(*events.lock(), vec![ClientEvent::Disconnected]);
    }
}
