//! Message envelope + wire codec contract
//!
//! Layout satu datagram:
//! ┌─────────────────────────────────────────────────────┐
//! │ MessageId (4 bytes, little-endian)                  │
//! ├─────────────────────────────────────────────────────┤
//! │ Encoded fields (variable, tanpa length prefix)      │
//! └─────────────────────────────────────────────────────┘
//!
//! Batas datagram = batas message. Transport menjamin satu
//! `Receive` event per message, jadi tidak ada framing tambahan.

use super::encoder::{Decoder, Encoder};
use crate::error::WireError;

/// Stable numeric tag identifying a message type inside one registry.
pub type MessageId = u32;

/// Size of the identity header in front of every payload.
pub const HEADER_SIZE: usize = std::mem::size_of::<MessageId>();

/// Capability every wire message implements.
///
/// `decode` must consume exactly the bytes `encode` produced, in the same
/// order, and must not look past its own fields.
pub trait NetMessage: Sized {
    /// Identity written in front of the payload.
    const ID: MessageId;

    /// Write the message fields at the encoder cursor.
    fn encode(&self, encoder: &mut Encoder<'_>) -> Result<(), WireError>;

    /// Read a fresh instance from the decoder cursor.
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, WireError>;
}

/// Write `M::ID` followed by the encoded message.
#[inline]
pub fn encode_envelope<M: NetMessage>(
    encoder: &mut Encoder<'_>,
    message: &M,
) -> Result<(), WireError> {
    encoder.write_u32(M::ID)?;
    message.encode(encoder)
}

/// Read the leading identity of an envelope.
#[inline]
pub fn read_message_id(decoder: &mut Decoder<'_>) -> Result<MessageId, WireError> {
    decoder.read_u32()
}
