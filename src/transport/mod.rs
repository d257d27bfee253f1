//! Transport Adapter contract
//!
//! Sessions tidak tahu apa-apa tentang socket: semua I/O lewat trait
//! [`Transport`]. Satu panggilan `service()` = paling banyak satu event,
//! non-blocking, dalam urutan kedatangan.
//!
//! Implementasi:
//! - [`LoopbackTransport`]: in-process, clock simulasi (single player + test)
//! - [`UdpTransport`]: mio UDP socket, handshake + keep-alive + timeout

use std::time::Duration;

use crate::error::TransportError;

mod loopback;
mod udp;

pub use loopback::{EndpointId, LoopbackNetwork, LoopbackTransport};
pub use udp::UdpTransport;

/// Transport-assigned peer identity, stable while the peer is connected.
pub type PeerId = u32;

/// Channel used by sessions for every message.
pub const DEFAULT_CHANNEL: u8 = 0;

/// Default idle time before a silent peer is reported as timed out.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Per-send delivery semantics, interpreted only by the transport.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Delivery {
    /// Reliable, ordered on its channel.
    #[default]
    Reliable = 0,
    /// Fire-and-forget, sequenced.
    Unreliable = 1,
    /// Fire-and-forget, no sequencing.
    Unsequenced = 2,
}

impl Delivery {
    /// Decode a wire flag; `None` for unknown values.
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Reliable),
            1 => Some(Self::Unreliable),
            2 => Some(Self::Unsequenced),
            _ => None,
        }
    }
}

/// Remote endpoint description reported on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub host: String,
    pub port: u16,
}

/// One event drained from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer finished connecting.
    Connect(PeerInfo),
    /// The remote side disconnected, carrying its out-of-band reason code.
    Disconnect { peer: PeerId, code: u32 },
    /// The peer stopped answering. Carries no reason data.
    Timeout { peer: PeerId },
    /// One complete datagram from `peer`, with the delivery the sender asked for.
    Receive {
        peer: PeerId,
        channel: u8,
        delivery: Delivery,
        payload: Vec<u8>,
    },
}

/// Black-box reliable-UDP engine as seen by a session.
///
/// Implementations must be driven from a single thread; `service` is never
/// called concurrently with itself or with `send`. A locally initiated
/// [`disconnect`](Transport::disconnect) does not produce a local
/// `Disconnect` event.
pub trait Transport {
    /// Idle time after which a silent peer produces [`TransportEvent::Timeout`].
    fn set_timeout(&mut self, timeout: Duration);

    /// Listen for incoming peers on `port`.
    fn start_listen(&mut self, port: u16, max_peers: usize) -> Result<(), TransportError>;

    /// Start connecting to `host:port`. Completion arrives as a `Connect` event.
    fn start_connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Tear down the host. Remaining peers are told with reason code `0`;
    /// no local events follow.
    fn stop(&mut self);

    fn is_started(&self) -> bool;

    /// Non-blocking poll for the next event.
    fn service(&mut self) -> Result<Option<TransportEvent>, TransportError>;

    /// Queue `payload` for `peer` on `channel`.
    fn send(
        &mut self,
        peer: PeerId,
        channel: u8,
        payload: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError>;

    /// Disconnect `peer`, handing `reason_code` to the remote side.
    fn disconnect(&mut self, peer: PeerId, reason_code: u32) -> Result<(), TransportError>;
}
