pub mod envelope;
pub mod ids;

pub use envelope::{now_ms, CodecError, Envelope, SystemEvent};
pub use ids::ConnectionId;
