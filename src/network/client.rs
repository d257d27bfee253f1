//! Client session: satu koneksi ke satu server.

use std::collections::VecDeque;

use tracing::{debug, info, trace, warn};

use super::config::ClientConfig;
use super::connection::{Connection, Link};
use super::event::{SessionEvent, SessionState};
use super::registry::{Context, Dispatch, MessageRegistry, Rejection};
use crate::error::{Result, SessionError};
use crate::protocol::{NetBuffers, NetMessage, StoppedReason};
use crate::transport::{Delivery, PeerId, Transport, TransportEvent};

/// Connecting session with a single server peer.
pub struct Client<T: Transport> {
    config: ClientConfig,
    transport: T,
    state: SessionState,
    buffers: NetBuffers,
    registry: Option<MessageRegistry>,
    connection: Option<Connection>,
    events: VecDeque<SessionEvent>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let buffers = NetBuffers::new(config.buffer_size);
        Self {
            config,
            transport,
            state: SessionState::Idle,
            buffers,
            registry: None,
            connection: None,
            events: VecDeque::new(),
        }
    }

    /// Begin connecting to the configured server.
    ///
    /// `Connected` follows once the server accepts; a server that never
    /// answers ends the session with `Stopped(Timeout)`.
    pub fn start(&mut self) -> Result<()> {
        if self.is_started() {
            warn!("client already started");
            return Ok(());
        }

        self.state = SessionState::Starting;
        self.registry = Some(MessageRegistry::new());
        self.connection = None;

        self.transport.set_timeout(self.config.timeout);
        if let Err(e) = self
            .transport
            .start_connect(&self.config.host, self.config.port)
        {
            self.registry = None;
            self.state = SessionState::Idle;
            return Err(e.into());
        }

        self.state = SessionState::Started;
        info!(host = %self.config.host, port = self.config.port, "client started");
        self.events.push_back(SessionEvent::Started);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.is_started() {
            warn!("client not started");
            return Ok(());
        }
        self.teardown(StoppedReason::LocalStopped);
        Ok(())
    }

    fn teardown(&mut self, reason: StoppedReason) {
        self.state = SessionState::Stopping;
        self.transport.stop();
        self.connection = None;
        self.registry = None;
        self.state = SessionState::Idle;

        info!(%reason, "client stopped");
        self.events.push_back(SessionEvent::Stopped(reason));
    }

    /// Service the transport for up to `max_events_per_tick` events.
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
                if self.state != SessionState::Started {
                    debug!(peer = info.id, "unexpected connect ignored");
                    return Ok(());
                }
                info!(host = %info.host, port = info.port, "connected to server");
                self.connection = Some(Connection::new(info));
                self.state = SessionState::Connected;
                self.events.push_back(SessionEvent::Connected);
            }
            TransportEvent::Disconnect { code, .. } => {
                self.teardown(StoppedReason::from_remote_code(code));
            }
            TransportEvent::Timeout { .. } => {
                self.teardown(StoppedReason::Timeout);
            }
            TransportEvent::Receive { peer, payload, .. } => {
                self.receive(peer, &payload)?;
            }
        }
        Ok(())
    }

    fn receive(&mut self, peer: PeerId, payload: &[u8]) -> Result<()> {
        let Some(registry) = self.registry.as_mut() else {
            return Ok(());
        };
        if self.connection.as_ref().map(Connection::id) != Some(peer) {
            debug!(peer, "data before connect ignored");
            return Ok(());
        }

        trace!(len = payload.len(), "packet received");

        let link = Link::new(&mut self.transport, &mut self.buffers.send);
        // Client tidak mengekspos connection ke handler: peer-nya selalu server
        let mut ctx = Context::new(peer, None, link);

        let outcome = match self.buffers.receive.load(payload) {
            Ok(mut decoder) => registry.dispatch(&mut ctx, &mut decoder),
            Err(e) => {
                warn!(error = %e, "packet larger than receive buffer");
                ctx.force_disconnect(StoppedReason::RemoteError);
                Ok(Dispatch::Rejected {
                    id: None,
                    reason: Rejection::Oversized(e),
                })
            }
        };

        let disconnected = ctx.disconnect_reason();
        let others = ctx.disconnects().len() - usize::from(disconnected.is_some());
        drop(ctx);

        if others > 0 {
            debug!(count = others, "disconnects of non-server peers ignored");
        }
        if let Some(reason) = disconnected {
            self.teardown(reason);
        }

        outcome.map(|_| ()).map_err(SessionError::from)
    }

    /// Send `message` to the server.
    pub fn send<M: NetMessage>(&mut self, message: &M, delivery: Delivery) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let connection = self.connection.as_ref().ok_or(SessionError::NotConnected)?;

        let mut link = Link::new(&mut self.transport, &mut self.buffers.send);
        connection.send(&mut link, message, delivery)
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.state != SessionState::Idle
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The server connection, once connected.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// `None` while idle.
    pub fn registry(&self) -> Option<&MessageRegistry> {
        self.registry.as_ref()
    }

    /// `None` while idle.
    pub fn registry_mut(&mut self) -> Option<&mut MessageRegistry> {
        self.registry.as_mut()
    }

    pub fn config(&self) -> &ClientConfig {
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
