//! Per-connection server-side handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use roomcast_core::ConnectionId;
use tokio::sync::mpsc;

/// One live transport session as the relay sees it.
///
/// The socket task owns the transport itself; this handle owns the outbound
/// queue feeding that task's writer half. Membership data lives in the
/// [`RoomRegistry`](crate::registry::RoomRegistry), not here.
pub struct ClientConnection {
    /// Unique connection ID, assigned on accept.
    pub id: ConnectionId,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Cleared when the transport closes; sends are skipped afterwards.
    open: AtomicBool,
    /// Count of messages dropped due to a full or closed queue.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            open: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a serialized frame for this connection without blocking.
    ///
    /// Returns `false` when the transport is not open or the queue is
    /// full/closed; the frame is dropped and counted, never retried.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if !self.is_open() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Whether the transport is still open for sends.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Mark the transport closed. Subsequent sends are skipped.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}
