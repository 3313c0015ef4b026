pub mod broadcast;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod server;

pub use broadcast::Broadcaster;
pub use config::ServerConfig;
pub use connection::ClientConnection;
pub use protocol::ProtocolHandler;
pub use registry::{Membership, RoomRegistry};
pub use server::{build_router, start, AppState, ServerHandle};
