//! Buffer pair: satu send buffer + satu receive buffer per session
//!
//! Prinsip desain:
//! - Pre-allocated: ukuran tetap, dialokasikan sekali saat session dibuat
//! - Reset cursor ke 0 sebelum setiap pemakaian
//! - Single owner: satu send dan satu receive in-flight, dijamin oleh
//!   borrow `&mut` (bukan lock)

use super::encoder::{Decoder, Encoder};
use super::message::{encode_envelope, NetMessage};
use crate::error::WireError;

/// Default capacity of each half, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Fixed-capacity outbound buffer.
pub struct SendBuffer {
    bytes: Box<[u8]>,
}

impl SendBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Encoder positioned at offset zero.
    #[inline(always)]
    pub fn encoder(&mut self) -> Encoder<'_> {
        Encoder::new(&mut self.bytes)
    }

    /// Encode `message` behind its identity, starting from offset zero.
    ///
    /// Returns the written range, valid until the next call.
    pub fn encode<M: NetMessage>(&mut self, message: &M) -> Result<&[u8], WireError> {
        let mut encoder = self.encoder();
        encode_envelope(&mut encoder, message)?;
        Ok(encoder.into_bytes())
    }
}

/// Fixed-capacity inbound buffer.
pub struct ReceiveBuffer {
    bytes: Box<[u8]>,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Copy a received packet in and return a decoder over it.
    ///
    /// Packets larger than the buffer are rejected untouched.
    pub fn load(&mut self, packet: &[u8]) -> Result<Decoder<'_>, WireError> {
        if packet.len() > self.bytes.len() {
            return Err(WireError::BufferOverflow {
                needed: packet.len(),
                available: self.bytes.len(),
            });
        }

        self.bytes[..packet.len()].copy_from_slice(packet);
        Ok(Decoder::new(&self.bytes[..packet.len()]))
    }
}

/// The send/receive pair owned by a session.
pub struct NetBuffers {
    pub send: SendBuffer,
    pub receive: ReceiveBuffer,
}

impl NetBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            send: SendBuffer::new(capacity),
            receive: ReceiveBuffer::new(capacity),
        }
    }
}

impl Default for NetBuffers {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}
