//! RFC 6455 WebSocket wire protocol over a raw byte-stream transport:
//! frame encoding and decoding, payload masking, the upgrade handshake,
//! message fragmentation and the per-connection state machine with
//! keepalive. The transport itself (TCP socket, pipeline, test fake) is
//! supplied by the host.

pub mod assembly;
pub mod close_code;
pub mod connection;
pub mod consts;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod handshake;
mod opcode;

pub use close_code::CloseCode;
pub use connection::{Config, Connection, ConnectionState, Handler, PongPolicy, Transport};
pub use error::ProtocolViolation;
pub use frame::Frame;
pub use opcode::Opcode;
