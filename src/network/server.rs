//! Server session
//!
//! Satu thread, di-drive oleh `update()` setiap tick:
//! transport event → connection table / registry dispatch → `SessionEvent`.
//!
//! Resource model:
//! - Satu `NetBuffers` per server, dipinjam via [`Link`] untuk setiap send
//! - Registry baru setiap `start()`
//! - Connection table hanya berubah karena event transport atau disconnect

use std::collections::VecDeque;

use tracing::{debug, info, trace, warn};

use super::config::ServerConfig;
use super::connection::{Connection, ConnectionTable, Link};
use super::event::{SessionEvent, SessionState};
use super::registry::{Context, Dispatch, MessageRegistry, Rejection};
use crate::error::{Result, SessionError};
use crate::protocol::{NetBuffers, NetMessage, StoppedReason};
use crate::transport::{Delivery, PeerId, Transport, TransportEvent};

/// Listening session serving many peers.
pub struct Server<T: Transport> {
    config: ServerConfig,
    transport: T,
    state: SessionState,
    buffers: NetBuffers,
    registry: Option<MessageRegistry>,
    connections: ConnectionTable,
    events: VecDeque<SessionEvent>,
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, config: ServerConfig) -> Self {
        let buffers = NetBuffers::new(config.buffer_size);
        Self {
            config,
            transport,
            state: SessionState::Idle,
            buffers,
            registry: None,
            connections: ConnectionTable::new(),
            events: VecDeque::new(),
        }
    }

    /// Start listening on the configured port.
    ///
    /// Creates a fresh registry; register handlers after this returns.
    pub fn start(&mut self) -> Result<()> {
        if self.is_started() {
            warn!("server already started");
            return Ok(());
        }

        self.state = SessionState::Starting;
        self.registry = Some(MessageRegistry::new());
        self.connections.clear();

        self.transport.set_timeout(self.config.timeout);
        if let Err(e) = self
            .transport
            .start_listen(self.config.port, self.config.max_clients)
        {
            self.registry = None;
            self.state = SessionState::Idle;
            return Err(e.into());
        }

        self.state = SessionState::Started;
        info!(
            port = self.config.port,
            max_clients = self.config.max_clients,
            "server started"
        );
        self.events.push_back(SessionEvent::Started);
        Ok(())
    }

    /// Disconnect every peer with `ServerClosing`, then stop the transport.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_started() {
            warn!("server not started");
            return Ok(());
        }

        self.state = SessionState::Stopping;

        let mut link = Link::new(&mut self.transport, &mut self.buffers.send);
        for id in self.connections.ids() {
            if let Err(e) = link.disconnect(id, StoppedReason::ServerClosing) {
                warn!(peer = id, error = %e, "failed to disconnect peer on shutdown");
            }
            self.events.push_back(SessionEvent::PeerDisconnected {
                id,
                reason: StoppedReason::ServerClosing,
            });
        }
        self.connections.clear();

        self.transport.stop();
        self.registry = None;
        self.state = SessionState::Idle;

        info!("server stopped");
        self.events
            .push_back(SessionEvent::Stopped(StoppedReason::LocalStopped));
        Ok(())
    }

    /// Service the transport for up to `max_events_per_tick` events.
    ///
    /// Returns the number of events processed. A handler error stops the
    /// tick at that message; later events stay with the transport.
    pub fn update(&mut self) -> Result<usize> {
        let mut processed = 0;

        while self.is_started() && processed < self.config.max_events_per_tick {
            let Some(event) = self.transport.service()? else {
                break;
            };
            processed += 1;
            self.handle_event(event)?;
        }

        Ok(processed)
    }

    fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Connect(info) => {
                let id = info.id;
                info!(peer = id, host = %info.host, port = info.port, "peer connected");
                self.connections.insert(info);
                self.events.push_back(SessionEvent::PeerConnected(id));
            }
            TransportEvent::Disconnect { peer, code } => {
                self.drop_peer(peer, StoppedReason::from_remote_code(code));
            }
            TransportEvent::Timeout { peer } => {
                self.drop_peer(peer, StoppedReason::Timeout);
            }
            TransportEvent::Receive { peer, payload, .. } => {
                self.receive(peer, &payload)?;
            }
        }
        Ok(())
    }

    fn drop_peer(&mut self, id: PeerId, reason: StoppedReason) {
        if self.connections.remove(id).is_none() {
            debug!(peer = id, %reason, "disconnect for unknown peer ignored");
            return;
        }
        info!(peer = id, %reason, "peer disconnected");
        self.events
            .push_back(SessionEvent::PeerDisconnected { id, reason });
    }

    /// Copy `payload` into the receive buffer and dispatch it.
    fn receive(&mut self, peer: PeerId, payload: &[u8]) -> Result<()> {
        let Some(registry) = self.registry.as_mut() else {
            return Ok(());
        };
        let Some(connection) = self.connections.get(peer) else {
            debug!(peer, len = payload.len(), "data from unknown peer ignored");
            return Ok(());
        };

        trace!(peer, len = payload.len(), "packet received");

        let link = Link::new(&mut self.transport, &mut self.buffers.send);
        let mut ctx = Context::new(peer, Some(connection), link);

        let outcome = match self.buffers.receive.load(payload) {
            Ok(mut decoder) => registry.dispatch(&mut ctx, &mut decoder),
            Err(e) => {
                warn!(peer, error = %e, "packet larger than receive buffer");
                ctx.force_disconnect(StoppedReason::RemoteError);
                Ok(Dispatch::Rejected {
                    id: None,
                    reason: Rejection::Oversized(e),
                })
            }
        };

        let disconnects = ctx.take_disconnects();
        drop(ctx);

        // Disconnect dari dalam handler (atau force) berlaku sebelum error handler
        for (id, reason) in disconnects {
            if self.connections.remove(id).is_some() {
                info!(peer = id, %reason, "peer disconnected by handler");
                self.events
                    .push_back(SessionEvent::PeerDisconnected { id, reason });
            }
        }

        outcome.map(|_| ()).map_err(SessionError::from)
    }

    /// Disconnect `id`, carrying `reason` to the peer.
    ///
    /// Returns `Ok(false)` with a warning if `id` is not connected. The
    /// table entry is removed immediately.
    pub fn disconnect(&mut self, id: PeerId, reason: StoppedReason) -> Result<bool> {
        if self.connections.remove(id).is_none() {
            warn!(peer = id, "disconnect of unknown connection ignored");
            return Ok(false);
        }

        info!(peer = id, %reason, "disconnecting peer");
        self.events
            .push_back(SessionEvent::PeerDisconnected { id, reason });
        Link::new(&mut self.transport, &mut self.buffers.send).disconnect(id, reason)?;
        Ok(true)
    }

    /// Send `message` to peer `id`, resolving it through the table.
    pub fn send<M: NetMessage>(
        &mut self,
        id: PeerId,
        message: &M,
        delivery: Delivery,
    ) -> Result<()> {
        if !self.is_started() {
            return Err(SessionError::NotStarted);
        }
        let connection = self
            .connections
            .get(id)
            .ok_or(SessionError::UnknownConnection(id))?;

        let mut link = Link::new(&mut self.transport, &mut self.buffers.send);
        connection.send(&mut link, message, delivery)
    }

    /// Send `message` to every connected peer. Returns the number of sends.
    pub fn broadcast<M: NetMessage>(&mut self, message: &M, delivery: Delivery) -> Result<usize> {
        if !self.is_started() {
            return Err(SessionError::NotStarted);
        }

        let mut link = Link::new(&mut self.transport, &mut self.buffers.send);
        let mut sent = 0;
        for connection in self.connections.iter() {
            connection.send(&mut link, message, delivery)?;
            sent += 1;
        }
        Ok(sent)
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.state != SessionState::Idle
    }

    /// `None` while idle.
    pub fn registry(&self) -> Option<&MessageRegistry> {
        self.registry.as_ref()
    }

    /// `None` while idle.
    pub fn registry_mut(&mut self) -> Option<&mut MessageRegistry> {
        self.registry.as_mut()
    }

    pub fn connection(&self, id: PeerId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.events.drain(..)
    }
}
