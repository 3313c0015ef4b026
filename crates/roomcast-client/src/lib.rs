pub mod client;

pub use client::{ClientError, ClientEvent, ConnectionState, Inbound, RoomClient};
