//! Connection handling dengan shared send buffer
//!
//! `Connection` tidak memiliki buffer sendiri: setiap send meminjam
//! send buffer milik session lewat [`Link`] (exclusive borrow), jadi
//! tidak ada alokasi pada hot path dan tidak mungkin ada dua send
//! in-flight sekaligus.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::protocol::{NetMessage, SendBuffer, StoppedReason};
use crate::transport::{Delivery, PeerId, PeerInfo, Transport, DEFAULT_CHANNEL};

/// Exclusive send path of a session: its transport plus its send buffer.
///
/// Only one `Link` can exist per session at a time.
pub struct Link<'a> {
    transport: &'a mut dyn Transport,
    buffer: &'a mut SendBuffer,
}

impl<'a> Link<'a> {
    pub fn new(transport: &'a mut dyn Transport, buffer: &'a mut SendBuffer) -> Self {
        Self { transport, buffer }
    }

    /// Encode `message` into the send buffer and submit it on the default
    /// channel.
    pub fn send<M: NetMessage>(
        &mut self,
        peer: PeerId,
        message: &M,
        delivery: Delivery,
    ) -> Result<()> {
        // Reset cursor, tulis id + payload
        let bytes = self.buffer.encode(message)?;
        self.transport.send(peer, DEFAULT_CHANNEL, bytes, delivery)?;
        trace!(peer, id = M::ID, len = bytes.len(), ?delivery, "message sent");
        Ok(())
    }

    /// Disconnect `peer`, carrying `reason` to the remote side.
    ///
    /// Local-only reasons arrive as `RemotelyDisconnected` on the other end.
    pub(crate) fn disconnect(
        &mut self,
        peer: PeerId,
        reason: StoppedReason,
    ) -> std::result::Result<(), TransportError> {
        if !reason.is_remote() {
            debug!(peer, %reason, "local-only reason sent to remote peer");
        }
        self.transport.disconnect(peer, reason.code())
    }
}

/// A session's view of one remote peer.
///
/// Do not keep one across ticks: hold its [`PeerId`] and look it up again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    id: PeerId,
    host: String,
    port: u16,
}

impl Connection {
    pub fn new(info: PeerInfo) -> Self {
        Self {
            id: info.id,
            host: info.host,
            port: info.port,
        }
    }

    #[inline(always)]
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline(always)]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send `message` to this peer through the session's send path.
    #[inline]
    pub fn send<M: NetMessage>(
        &self,
        link: &mut Link<'_>,
        message: &M,
        delivery: Delivery,
    ) -> Result<()> {
        link.send(self.id, message, delivery)
    }

    /// [`send`](Self::send) with [`Delivery::Reliable`].
    #[inline]
    pub fn send_reliable<M: NetMessage>(&self, link: &mut Link<'_>, message: &M) -> Result<()> {
        self.send(link, message, Delivery::Reliable)
    }
}

impl From<PeerInfo> for Connection {
    fn from(info: PeerInfo) -> Self {
        Self::new(info)
    }
}

/// Server-side table of connected peers, keyed by transport peer id.
///
/// Mutated only from transport lifecycle events and explicit disconnects.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<PeerId, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection for a freshly connected peer.
    ///
    /// Returns the previous entry if the transport reused a live id.
    pub fn insert(&mut self, info: PeerInfo) -> Option<Connection> {
        let id = info.id;
        let previous = self.connections.insert(id, Connection::new(info));
        if previous.is_some() {
            warn!(peer = id, "connection replaced an existing entry");
        }
        previous
    }

    pub fn remove(&mut self, id: PeerId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    #[inline]
    pub fn get(&self, id: PeerId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    #[inline]
    pub fn contains(&self, id: PeerId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Connected peer ids, ascending.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }
}
