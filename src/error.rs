//! Error types for netfork.
//!
//! Usage errors (double start, stop while idle, stale connection) are
//! logged and ignored by the sessions; only the failures below surface
//! as `Err`.

use std::io;

use thiserror::Error;

use crate::protocol::MessageId;
use crate::transport::PeerId;

/// Boxed error returned by application message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Encoding/decoding failures on a fixed buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer overflow: needed {needed} bytes, {available} available")]
    BufferOverflow { needed: usize, available: usize },

    #[error("unexpected end of message: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed length prefix")]
    MalformedLength,
}

/// Failures reported by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot resolve address {0}")]
    AddressResolution(String),

    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport not started")]
    NotStarted,

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("port {0} already in use")]
    AddressInUse(u16),

    #[error("payload of {len} bytes exceeds transport limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Registration failures in a message registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("message id {id} already registered by {existing}")]
    DuplicateId {
        id: MessageId,
        existing: &'static str,
    },
}

/// Failures surfaced by client and server sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An application handler failed; the tick stops at that message.
    #[error("handler for message id {message_id} failed: {source}")]
    Handler {
        message_id: MessageId,
        #[source]
        source: HandlerError,
    },

    #[error("no connection with id {0}")]
    UnknownConnection(PeerId),

    #[error("not connected")]
    NotConnected,

    #[error("session not started")]
    NotStarted,
}

/// Result type alias using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;
