use serde::{Deserialize, Serialize};

/// Failed to turn a text frame into an [`Envelope`] (or back).
/// Callers on the relay path drop the frame rather than surface this.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Membership change carried by a `system` envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemEvent {
    Join,
    Leave,
    Disconnect,
}

impl SystemEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Disconnect => "disconnect",
        }
    }
}

/// One protocol message exchanged over the transport, as a tagged UTF-8
/// JSON text frame.
///
/// `join`/`leave`/`chat` travel client → server; `system` and the
/// rebroadcast `chat` travel server → room members. Inbound fields the
/// sender may omit default to empty; the protocol handler decides whether
/// an empty field makes the envelope droppable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    #[serde(rename_all = "camelCase")]
    Join {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        user: String,
    },

    #[serde(rename_all = "camelCase")]
    Leave {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        user: String,
    },

    #[serde(rename_all = "camelCase")]
    Chat {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        user: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        ts: i64,
    },

    #[serde(rename_all = "camelCase")]
    System {
        event: SystemEvent,
        user: String,
        room_id: String,
        online: usize,
        ts: i64,
    },
}

impl Envelope {
    /// Serialize into one text frame.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one text frame. Unknown `type` tags and structurally invalid
    /// JSON both fail here.
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Current time as epoch milliseconds, the `ts` unit on the wire.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
