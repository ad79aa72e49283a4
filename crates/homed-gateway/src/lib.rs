//! TCP gateway protocol: byte framing, the 32-bit DH handshake, AES-128-CBC
//! cipher, and the per-connection authentication state machine.
//!
//! No HTTP lives here — gateways speak a raw framed TCP protocol, not
//! WebSocket, so this crate owns a plain `tokio::net::TcpListener` accept
//! loop directly rather than sitting behind a web framework's router.

pub mod connection;
pub mod crypto;
pub mod frame;
pub mod listener;
pub mod wire;

pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionState, GatewayConnection};
