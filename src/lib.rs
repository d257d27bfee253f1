//! Netfork - typed message sessions di atas UDP transport
//!
//! Arsitektur:
//! - Transport: black box (connect/disconnect/timeout/receive + send)
//! - Registry: message identity → typed handler
//! - Session: client/server state machine, connection table, reason codes
//! - Buffers: satu send + satu receive buffer per session, tanpa alokasi per message
//!
//! Semua operasi synchronous dan single-threaded: session di-drive oleh
//! `update()` dari loop milik aplikasi.

pub mod error;
pub mod messages;
pub mod network;
pub mod protocol;
pub mod transport;

pub use error::{
    HandlerError, HandlerResult, RegistryError, Result, SessionError, TransportError, WireError,
};
pub use messages::{ServerInfoMessage, TestMessage};
pub use network::{
    Client, ClientConfig, Connection, ConnectionTable, Context, Dispatch, HandlerFailure, Link,
    MessageRegistry, Rejection, Server, ServerConfig, SessionEvent, SessionState,
};
pub use protocol::{Decoder, Encoder, MessageId, NetBuffers, NetMessage, StoppedReason};
pub use transport::{
    Delivery, LoopbackNetwork, LoopbackTransport, PeerId, PeerInfo, Transport, TransportEvent,
    UdpTransport,
};
