//! Test doubles shared by the session unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{TransportError, WireError};
use crate::protocol::{Decoder, Encoder, MessageId, NetMessage};
use crate::transport::{Delivery, PeerId, PeerInfo, Transport, TransportEvent};

/// Transport that replays queued events and records every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    pub started: bool,
    pub fail_start: bool,
    pub timeout: Option<Duration>,
    pub listen: Option<(u16, usize)>,
    pub connect: Option<(String, u16)>,
    pub incoming: VecDeque<TransportEvent>,
    pub sent: Vec<(PeerId, u8, Vec<u8>, Delivery)>,
    pub disconnects: Vec<(PeerId, u32)>,
    pub stops: usize,
}

impl ScriptedTransport {
    pub fn push(&mut self, event: TransportEvent) {
        self.incoming.push_back(event);
    }

    pub fn push_connect(&mut self, id: PeerId) {
        self.push(TransportEvent::Connect(PeerInfo {
            id,
            host: "10.0.0.1".to_string(),
            port: 40_000 + id as u16,
        }));
    }

    pub fn push_receive(&mut self, peer: PeerId, payload: Vec<u8>) {
        self.push(TransportEvent::Receive {
            peer,
            channel: 0,
            delivery: Delivery::Reliable,
            payload,
        });
    }
}

impl Transport for ScriptedTransport {
    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn start_listen(&mut self, port: u16, max_peers: usize) -> Result<(), TransportError> {
        if self.fail_start {
            return Err(TransportError::AddressInUse(port));
        }
        self.listen = Some((port, max_peers));
        self.started = true;
        Ok(())
    }

    fn start_connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.fail_start {
            return Err(TransportError::AddressResolution(format!("{host}:{port}")));
        }
        self.connect = Some((host.to_string(), port));
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        self.stops += 1;
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn service(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        Ok(self.incoming.pop_front())
    }

    fn send(
        &mut self,
        peer: PeerId,
        channel: u8,
        payload: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        self.sent.push((peer, channel, payload.to_vec(), delivery));
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId, reason_code: u32) -> Result<(), TransportError> {
        self.disconnects.push((peer, reason_code));
        Ok(())
    }
}

/// Minimal fixed-size message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ping {
    pub nonce: u64,
}

impl NetMessage for Ping {
    const ID: MessageId = 0x50;

    fn encode(&self, encoder: &mut Encoder<'_>) -> Result<(), WireError> {
        encoder.write_u64(self.nonce)
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, WireError> {
        Ok(Self {
            nonce: decoder.read_u64()?,
        })
    }
}

/// Envelope bytes for `message`.
pub(crate) fn envelope<M: NetMessage>(message: &M) -> Vec<u8> {
    let mut buffer = crate::protocol::SendBuffer::new(256);
    buffer.encode(message).map(<[u8]>::to_vec).unwrap_or_default()
}
