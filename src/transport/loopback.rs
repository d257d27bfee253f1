//! Loopback transport for in-process client-server sessions.
//!
//! All endpoints live in one [`LoopbackNetwork`] hub: no sockets, no
//! threads, and a manual clock. The hub is an explicit resource handle;
//! every transport holds a clone and the hub is torn down with the last one.
//!
//! Liveness follows the usual keep-alive model: servicing an endpoint
//! "pings" every peer it is connected to. A peer that has not been heard
//! from for longer than the endpoint's timeout produces a `Timeout` event.
//! Drive both sides while advancing the clock in steps shorter than the
//! timeout, or every peer will look dead.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{Delivery, PeerId, PeerInfo, Transport, TransportEvent, DEFAULT_TIMEOUT};
use crate::error::TransportError;

/// Host name reported for loopback peers.
const LOOPBACK_HOST: &str = "127.0.0.1";

/// First synthetic port handed to connecting endpoints.
const EPHEMERAL_PORT_BASE: u16 = 49152;

/// Handle of one endpoint inside a [`LoopbackNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

type PipeId = u64;

const CLIENT_SIDE: usize = 0;
const SERVER_SIDE: usize = 1;

/// One side of a pipe.
#[derive(Debug)]
struct PipeEnd {
    endpoint: EndpointId,
    /// Id under which this side knows the other side.
    peer: PeerId,
    open: bool,
    /// Last time this side heard from the other side.
    heard_at: Duration,
}

/// Connection between two endpoints. The server side is missing while the
/// handshake never completed.
#[derive(Debug)]
struct Pipe {
    ends: [Option<PipeEnd>; 2],
}

impl Pipe {
    fn side_of(&self, endpoint: EndpointId) -> Option<usize> {
        self.ends
            .iter()
            .position(|end| end.as_ref().is_some_and(|e| e.endpoint == endpoint))
    }

    fn is_dead(&self) -> bool {
        self.ends.iter().flatten().all(|end| !end.open)
    }
}

#[derive(Debug)]
struct Endpoint {
    started: bool,
    reachable: bool,
    timeout: Duration,
    port: u16,
    max_peers: usize,
    listening: bool,
    peers: BTreeMap<PeerId, PipeId>,
    inbox: VecDeque<TransportEvent>,
}

impl Endpoint {
    fn new(port: u16) -> Self {
        Self {
            started: false,
            reachable: true,
            timeout: DEFAULT_TIMEOUT,
            port,
            max_peers: 0,
            listening: false,
            peers: BTreeMap::new(),
            inbox: VecDeque::new(),
        }
    }

    fn free_peer_id(&self) -> PeerId {
        let mut id = 0;
        while self.peers.contains_key(&id) {
            id += 1;
        }
        id
    }
}

#[derive(Debug, Default)]
struct Hub {
    now: Duration,
    endpoints: HashMap<EndpointId, Endpoint>,
    listeners: HashMap<u16, EndpointId>,
    pipes: HashMap<PipeId, Pipe>,
    next_endpoint: u32,
    next_pipe: PipeId,
}

impl Hub {
    fn endpoint(&mut self, id: EndpointId) -> Result<&mut Endpoint, TransportError> {
        self.endpoints
            .get_mut(&id)
            .ok_or(TransportError::NotStarted)
    }

    fn reachable(&self, id: EndpointId) -> bool {
        self.endpoints.get(&id).is_some_and(|ep| ep.reachable)
    }

    fn link_up(&self, a: EndpointId, b: EndpointId) -> bool {
        self.reachable(a) && self.reachable(b)
    }

    fn push_event(&mut self, endpoint: EndpointId, event: TransportEvent) {
        if let Some(ep) = self.endpoints.get_mut(&endpoint) {
            ep.inbox.push_back(event);
        }
    }

    fn start_listen(
        &mut self,
        id: EndpointId,
        port: u16,
        max_peers: usize,
    ) -> Result<(), TransportError> {
        if self.listeners.contains_key(&port) {
            return Err(TransportError::AddressInUse(port));
        }

        let ep = self.endpoint(id)?;
        if ep.started {
            return Err(TransportError::AlreadyStarted);
        }
        ep.started = true;
        ep.listening = true;
        ep.port = port;
        ep.max_peers = max_peers;

        self.listeners.insert(port, id);
        debug!(endpoint = %id, port, max_peers, "loopback listening");
        Ok(())
    }

    fn start_connect(
        &mut self,
        id: EndpointId,
        host: &str,
        port: u16,
    ) -> Result<(), TransportError> {
        let now = self.now;
        let ep = self.endpoint(id)?;
        if ep.started {
            return Err(TransportError::AlreadyStarted);
        }
        ep.started = true;
        let client_port = ep.port;
        let client_peer = ep.free_peer_id();

        let pipe_id = self.next_pipe;
        self.next_pipe += 1;

        let mut pipe = Pipe {
            ends: [
                Some(PipeEnd {
                    endpoint: id,
                    peer: client_peer,
                    open: true,
                    heard_at: now,
                }),
                None,
            ],
        };

        // Handshake selesai langsung kalau listener ada, hidup, dan belum penuh
        let accepted = self.listeners.get(&port).copied().filter(|server| {
            self.link_up(id, *server)
                && self
                    .endpoints
                    .get(server)
                    .is_some_and(|ep| ep.peers.len() < ep.max_peers)
        });

        if let Some(server) = accepted {
            let server_ep = self.endpoint(server)?;
            let server_peer = server_ep.free_peer_id();
            server_ep.peers.insert(server_peer, pipe_id);

            pipe.ends[SERVER_SIDE] = Some(PipeEnd {
                endpoint: server,
                peer: server_peer,
                open: true,
                heard_at: now,
            });

            self.push_event(
                server,
                TransportEvent::Connect(PeerInfo {
                    id: server_peer,
                    host: LOOPBACK_HOST.to_string(),
                    port: client_port,
                }),
            );
            self.push_event(
                id,
                TransportEvent::Connect(PeerInfo {
                    id: client_peer,
                    host: host.to_string(),
                    port,
                }),
            );
            debug!(client = %id, server = %server, port, "loopback handshake complete");
        } else {
            debug!(client = %id, port, "no listener accepted, connect will time out");
        }

        self.endpoint(id)?.peers.insert(client_peer, pipe_id);
        self.pipes.insert(pipe_id, pipe);
        Ok(())
    }

    /// Resolve `peer` of `endpoint` to its pipe and the local side index.
    fn locate(
        &self,
        endpoint: EndpointId,
        peer: PeerId,
    ) -> Result<(PipeId, usize), TransportError> {
        let pipe_id = self
            .endpoints
            .get(&endpoint)
            .and_then(|ep| ep.peers.get(&peer))
            .copied()
            .ok_or(TransportError::UnknownPeer(peer))?;
        let side = self
            .pipes
            .get(&pipe_id)
            .and_then(|pipe| pipe.side_of(endpoint))
            .ok_or(TransportError::UnknownPeer(peer))?;
        Ok((pipe_id, side))
    }

    fn send(
        &mut self,
        endpoint: EndpointId,
        peer: PeerId,
        channel: u8,
        payload: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        let (pipe_id, side) = self.locate(endpoint, peer)?;
        let Some(remote) = self
            .pipes
            .get(&pipe_id)
            .and_then(|pipe| pipe.ends[1 - side].as_ref())
            .filter(|end| end.open)
            .map(|end| (end.endpoint, end.peer))
        else {
            // Handshake belum selesai: datagram hilang
            trace!(endpoint = %endpoint, peer, "dropping send on half-open pipe");
            return Ok(());
        };

        if !self.link_up(endpoint, remote.0) {
            trace!(endpoint = %endpoint, peer, ?delivery, "link down, datagram lost");
            return Ok(());
        }

        self.push_event(
            remote.0,
            TransportEvent::Receive {
                peer: remote.1,
                channel,
                delivery,
                payload: payload.to_vec(),
            },
        );
        Ok(())
    }

    /// Close the local side of `peer`, telling the other side if it can hear us.
    fn close(
        &mut self,
        endpoint: EndpointId,
        peer: PeerId,
        code: u32,
    ) -> Result<(), TransportError> {
        let (pipe_id, side) = self.locate(endpoint, peer)?;

        if let Some(ep) = self.endpoints.get_mut(&endpoint) {
            ep.peers.remove(&peer);
        }

        let mut notify = None;
        if let Some(pipe) = self.pipes.get_mut(&pipe_id) {
            if let Some(end) = pipe.ends[side].as_mut() {
                end.open = false;
            }
            if let Some(remote) = pipe.ends[1 - side].as_ref().filter(|end| end.open) {
                notify = Some((remote.endpoint, remote.peer));
            }
        }

        if let Some((remote, remote_peer)) = notify {
            if self.link_up(endpoint, remote) {
                if let Some(end) = self
                    .pipes
                    .get_mut(&pipe_id)
                    .and_then(|pipe| pipe.ends[1 - side].as_mut())
                {
                    end.open = false;
                }
                if let Some(ep) = self.endpoints.get_mut(&remote) {
                    ep.peers.remove(&remote_peer);
                }
                self.push_event(
                    remote,
                    TransportEvent::Disconnect {
                        peer: remote_peer,
                        code,
                    },
                );
            }
        }

        self.reap(pipe_id);
        Ok(())
    }

    fn reap(&mut self, pipe_id: PipeId) {
        if self.pipes.get(&pipe_id).is_some_and(Pipe::is_dead) {
            self.pipes.remove(&pipe_id);
        }
    }

    fn stop(&mut self, id: EndpointId) {
        let peers: Vec<PeerId> = self
            .endpoints
            .get(&id)
            .map(|ep| ep.peers.keys().copied().collect())
            .unwrap_or_default();
        for peer in peers {
            let _ = self.close(id, peer, 0);
        }

        if let Some(ep) = self.endpoints.get_mut(&id) {
            if ep.listening {
                self.listeners.remove(&ep.port);
            }
            ep.started = false;
            ep.listening = false;
            ep.inbox.clear();
        }
    }

    fn service(&mut self, id: EndpointId) -> Option<TransportEvent> {
        let now = self.now;
        let (timeout, pipes) = match self.endpoints.get(&id) {
            Some(ep) if ep.started => (
                ep.timeout,
                ep.peers
                    .iter()
                    .map(|(peer, pipe)| (*peer, *pipe))
                    .collect::<Vec<_>>(),
            ),
            _ => return None,
        };

        let mut expired = Vec::new();
        for (peer, pipe_id) in pipes {
            let Some(side) = self.pipes.get(&pipe_id).and_then(|pipe| pipe.side_of(id)) else {
                continue;
            };

            // Keep-alive: sisi lain mendengar kita kalau link hidup
            let remote = self.pipes[&pipe_id].ends[1 - side]
                .as_ref()
                .filter(|end| end.open)
                .map(|end| end.endpoint);
            if let Some(remote) = remote {
                if self.link_up(id, remote) {
                    if let Some(end) = self
                        .pipes
                        .get_mut(&pipe_id)
                        .and_then(|pipe| pipe.ends[1 - side].as_mut())
                    {
                        end.heard_at = now;
                    }
                }
            }

            let heard_at = self.pipes[&pipe_id].ends[side]
                .as_ref()
                .map_or(now, |end| end.heard_at);
            if now.saturating_sub(heard_at) > timeout {
                expired.push((peer, pipe_id, side));
            }
        }

        for (peer, pipe_id, side) in expired {
            debug!(endpoint = %id, peer, "loopback peer timed out");
            if let Some(end) = self
                .pipes
                .get_mut(&pipe_id)
                .and_then(|pipe| pipe.ends[side].as_mut())
            {
                end.open = false;
            }
            if let Some(ep) = self.endpoints.get_mut(&id) {
                ep.peers.remove(&peer);
                ep.inbox.push_back(TransportEvent::Timeout { peer });
            }
            self.reap(pipe_id);
        }

        self.endpoints.get_mut(&id)?.inbox.pop_front()
    }
}

/// Shared in-process network with a manual clock.
///
/// Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, unstarted endpoint on this network.
    pub fn transport(&self) -> LoopbackTransport {
        let mut hub = self.hub.borrow_mut();
        let id = EndpointId(hub.next_endpoint);
        hub.next_endpoint += 1;

        let port = EPHEMERAL_PORT_BASE.wrapping_add(id.0 as u16);
        hub.endpoints.insert(id, Endpoint::new(port));

        LoopbackTransport {
            network: self.clone(),
            id,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.hub.borrow().now
    }

    /// Move the simulated clock forward.
    pub fn advance(&self, by: Duration) {
        self.hub.borrow_mut().now += by;
    }

    /// Cut (or restore) all traffic to and from `endpoint`.
    pub fn set_reachable(&self, endpoint: EndpointId, reachable: bool) {
        if let Some(ep) = self.hub.borrow_mut().endpoints.get_mut(&endpoint) {
            ep.reachable = reachable;
        }
    }

    /// Peers `endpoint` currently considers connected, ascending.
    pub fn peers_of(&self, endpoint: EndpointId) -> Vec<PeerId> {
        self.hub
            .borrow()
            .endpoints
            .get(&endpoint)
            .map(|ep| ep.peers.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// One endpoint of a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    id: EndpointId,
}

impl LoopbackTransport {
    pub fn endpoint(&self) -> EndpointId {
        self.id
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }
}

impl Transport for LoopbackTransport {
    fn set_timeout(&mut self, timeout: Duration) {
        if let Some(ep) = self.network.hub.borrow_mut().endpoints.get_mut(&self.id) {
            ep.timeout = timeout;
        }
    }

    fn start_listen(&mut self, port: u16, max_peers: usize) -> Result<(), TransportError> {
        self.network
            .hub
            .borrow_mut()
            .start_listen(self.id, port, max_peers)
    }

    fn start_connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.network
            .hub
            .borrow_mut()
            .start_connect(self.id, host, port)
    }

    fn stop(&mut self) {
        self.network.hub.borrow_mut().stop(self.id);
    }

    fn is_started(&self) -> bool {
        self.network
            .hub
            .borrow()
            .endpoints
            .get(&self.id)
            .is_some_and(|ep| ep.started)
    }

    fn service(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        Ok(self.network.hub.borrow_mut().service(self.id))
    }

    fn send(
        &mut self,
        peer: PeerId,
        channel: u8,
        payload: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        self.network
            .hub
            .borrow_mut()
            .send(self.id, peer, channel, payload, delivery)
    }

    fn disconnect(&mut self, peer: PeerId, reason_code: u32) -> Result<(), TransportError> {
        self.network
            .hub
            .borrow_mut()
            .close(self.id, peer, reason_code)
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if let Ok(mut hub) = self.network.hub.try_borrow_mut() {
            hub.stop(self.id);
            hub.endpoints.remove(&self.id);
        }
    }
}
