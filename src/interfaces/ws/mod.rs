//! WebSocket interface for notification clients

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{handle_socket, ClientDeps, ClientSession};
pub use protocol::{Command, Stage, Status, UserRequest, WsResponse};
pub use server::notification_router;
