//! Protocol Layer: message envelope, cursors, buffers, reason codes
//!
//! Prinsip desain:
//! - Flat Binary: identity 4 byte lalu field message, tanpa framing
//! - Fixed buffers: encode/decode langsung ke/dari buffer session
//! - Little-endian, string dengan prefix panjang varint 7-bit

mod buffers;
mod encoder;
mod message;
mod reason;

pub use buffers::{NetBuffers, ReceiveBuffer, SendBuffer, DEFAULT_BUFFER_SIZE};
pub use encoder::{Decoder, Encoder};
pub use message::{encode_envelope, read_message_id, MessageId, NetMessage, HEADER_SIZE};
pub use reason::StoppedReason;
