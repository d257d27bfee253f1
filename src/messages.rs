//! Demo payloads used by the bundled server and client binaries.

use crate::error::WireError;
use crate::protocol::{Decoder, Encoder, MessageId, NetMessage};

/// Server → client: build and clock information.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfoMessage {
    pub engine_version: String,
    pub current_date: String,
}

impl ServerInfoMessage {
    pub fn new(engine_version: impl Into<String>, current_date: impl Into<String>) -> Self {
        Self {
            engine_version: engine_version.into(),
            current_date: current_date.into(),
        }
    }

    /// This crate's version and the current UTC time.
    pub fn current() -> Self {
        Self::new(
            concat!("netfork ", env!("CARGO_PKG_VERSION")),
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
    }
}

impl NetMessage for ServerInfoMessage {
    const ID: MessageId = 10;

    fn encode(&self, encoder: &mut Encoder<'_>) -> Result<(), WireError> {
        encoder.write_string(&self.engine_version)?;
        encoder.write_string(&self.current_date)
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, WireError> {
        Ok(Self {
            engine_version: decoder.read_string()?,
            current_date: decoder.read_string()?,
        })
    }
}

/// Client → server test message carrying one integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestMessage {
    pub birthday_year: i32,
}

impl NetMessage for TestMessage {
    const ID: MessageId = 11;

    fn encode(&self, encoder: &mut Encoder<'_>) -> Result<(), WireError> {
        encoder.write_i32(self.birthday_year)
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, WireError> {
        Ok(Self {
            birthday_year: decoder.read_i32()?,
        })
    }
}
