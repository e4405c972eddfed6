//! A minimal server-side WebSocket implementation for the Tokio stack.
//!
//! This crate implements [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455) frame
//! parsing, the HTTP upgrade handshake, a per-connection state machine and a connection
//! registry with broadcast fan-out. It only speaks the server role: accepting inbound
//! connections, not dialing outbound ones.

mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod server;
mod utils;

pub use codec::{decode_message, encode_binary, encode_close, encode_frame, encode_pong, encode_text};
pub use config::{ServerConfig, WebSocketConfig};
pub use connection::Connection;
pub use error::Error;
pub use frame::{Frame, OpCode};
pub use server::Server;
