//! Minimal UDP transport dengan mio
//!
//! Non-blocking socket, single-threaded, di-drive oleh `service()`.
//!
//! Fitur:
//! - Handshake CONNECT/ACCEPT, retry sampai timeout
//! - Keep-alive PING dan idle timeout per peer
//! - Disconnect dengan reason code 32-bit
//! - Pre-allocated receive buffer dan frame scratch (tanpa alokasi per send)
//!
//! Delivery hanya best-effort: flag `Delivery` dibawa di frame dan
//! dilaporkan ke penerima, tapi tidak ada retransmission. Untuk
//! reliability penuh, pasang engine reliable-UDP di balik trait
//! [`Transport`].
//!
//! Frame layout: `[kind:u8][body...]`
//! - `CONNECT` / `ACCEPT` / `PING`: body kosong
//! - `DATA`: `[channel:u8][delivery:u8][payload]`
//! - `DISCONNECT`: `[code:u32 LE]`

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace, warn};

use super::{Delivery, PeerId, PeerInfo, Transport, TransportEvent, DEFAULT_TIMEOUT};
use crate::error::TransportError;

const SOCKET_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 16;

/// Receive buffer size - cukup untuk datagram UDP terbesar
const RECV_BUFFER_SIZE: usize = 64 * 1024;
/// Largest datagram a UDP socket can carry over IPv4.
const MAX_DATAGRAM_SIZE: usize = 65_507;
const DATA_HEADER_SIZE: usize = 3;
/// Largest payload accepted by [`UdpTransport::send`].
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - DATA_HEADER_SIZE;

/// Datagrams read per `service()` call before yielding.
const MAX_RECV_PER_SERVICE: usize = 256;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(250);
const MIN_PING_INTERVAL: Duration = Duration::from_millis(50);

/// SO_SNDBUF / SO_RCVBUF
#[cfg(unix)]
const SOCKET_BUFFER_SIZE: libc::c_int = 256 * 1024;

mod frame {
    pub const CONNECT: u8 = 1;
    pub const ACCEPT: u8 = 2;
    pub const DATA: u8 = 3;
    pub const DISCONNECT: u8 = 4;
    pub const PING: u8 = 5;
}

enum Role {
    Listener { max_peers: usize },
    Connector { host: String, port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Connecting,
    Connected,
}

struct RemotePeer {
    addr: SocketAddr,
    state: PeerState,
    last_received: Instant,
    last_sent: Instant,
}

/// Live socket plus per-peer state. Exists only while started.
struct Host {
    poll: Poll,
    events: Events,
    socket: UdpSocket,
    readable: bool,
    role: Role,
    peers: BTreeMap<PeerId, RemotePeer>,
    by_addr: HashMap<SocketAddr, PeerId>,
    pending: VecDeque<TransportEvent>,
    recv_buffer: Box<[u8]>,
    frame: Vec<u8>,
}

impl Host {
    fn open(addr: SocketAddr, role: Role) -> io::Result<Self> {
        let mut socket = UdpSocket::bind(addr)?;
        tune_socket_buffers(&socket);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            socket,
            // Coba baca sekali di service pertama
            readable: true,
            role,
            peers: BTreeMap::new(),
            by_addr: HashMap::new(),
            pending: VecDeque::new(),
            recv_buffer: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            frame: Vec::with_capacity(RECV_BUFFER_SIZE),
        })
    }

    fn send_frame(&mut self, addr: SocketAddr, header: &[u8], payload: &[u8]) -> io::Result<()> {
        self.frame.clear();
        self.frame.extend_from_slice(header);
        self.frame.extend_from_slice(payload);

        match self.socket.send_to(&self.frame, addr) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // Socket buffer penuh: datagram dibuang, seperti UDP biasa
                trace!(%addr, len = self.frame.len(), "send would block, datagram dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn send_control(
        &mut self,
        peer: PeerId,
        kind: u8,
        body: &[u8],
        now: Instant,
    ) -> io::Result<()> {
        let Some(addr) = self.peers.get(&peer).map(|p| p.addr) else {
            return Ok(());
        };
        self.send_frame(addr, &[kind], body)?;
        if let Some(remote) = self.peers.get_mut(&peer) {
            remote.last_sent = now;
        }
        Ok(())
    }

    fn remove_peer(&mut self, peer: PeerId) -> Option<RemotePeer> {
        let remote = self.peers.remove(&peer)?;
        self.by_addr.remove(&remote.addr);
        Some(remote)
    }

    fn free_peer_id(&self) -> PeerId {
        let mut id = 0;
        while self.peers.contains_key(&id) {
            id += 1;
        }
        id
    }

    fn poll_socket(&mut self) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            if event.token() == SOCKET_TOKEN && event.is_readable() {
                self.readable = true;
            }
        }
        Ok(())
    }

    /// Drain readable datagrams. Readiness is edge-triggered, so `readable`
    /// stays set until the socket reports `WouldBlock`.
    fn receive(&mut self, now: Instant) -> io::Result<()> {
        if !self.readable {
            return Ok(());
        }

        let mut buffer = std::mem::take(&mut self.recv_buffer);
        let mut result = Ok(());

        for _ in 0..MAX_RECV_PER_SERVICE {
            match self.socket.recv_from(&mut buffer) {
                Ok((n, from)) => self.handle_datagram(from, &buffer[..n], now),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.readable = false;
                    break;
                }
                // ICMP port unreachable dari peer yang sudah pergi
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    trace!(error = %e, "icmp error reported on udp socket");
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.recv_buffer = buffer;
        result
    }

    fn handle_datagram(&mut self, from: SocketAddr, datagram: &[u8], now: Instant) {
        let Some((&kind, body)) = datagram.split_first() else {
            trace!(%from, "empty datagram ignored");
            return;
        };

        match self.by_addr.get(&from).copied() {
            Some(peer) => self.handle_peer_frame(peer, kind, body, now),
            None if kind == frame::CONNECT => self.accept(from, now),
            None => trace!(%from, kind, "datagram from unknown address ignored"),
        }
    }

    fn accept(&mut self, from: SocketAddr, now: Instant) {
        let max_peers = match self.role {
            Role::Listener { max_peers } => max_peers,
            Role::Connector { .. } => {
                trace!(%from, "connect request ignored by connector");
                return;
            }
        };

        if self.peers.len() >= max_peers {
            // Tidak dijawab: client akan timeout sendiri
            debug!(%from, max_peers, "peer limit reached, connect request dropped");
            return;
        }

        let id = self.free_peer_id();
        self.peers.insert(
            id,
            RemotePeer {
                addr: from,
                state: PeerState::Connected,
                last_received: now,
                last_sent: now,
            },
        );
        self.by_addr.insert(from, id);

        if let Err(e) = self.send_control(id, frame::ACCEPT, &[], now) {
            warn!(%from, error = %e, "failed to send accept");
        }

        debug!(peer = id, %from, "peer connected");
        self.pending.push_back(TransportEvent::Connect(PeerInfo {
            id,
            host: from.ip().to_string(),
            port: from.port(),
        }));
    }

    fn handle_peer_frame(&mut self, peer: PeerId, kind: u8, body: &[u8], now: Instant) {
        let state = match self.peers.get_mut(&peer) {
            Some(remote) => {
                remote.last_received = now;
                remote.state
            }
            None => return,
        };

        match kind {
            frame::CONNECT => {
                // ACCEPT sebelumnya hilang, kirim ulang
                if matches!(self.role, Role::Listener { .. }) {
                    if let Err(e) = self.send_control(peer, frame::ACCEPT, &[], now) {
                        warn!(peer, error = %e, "failed to resend accept");
                    }
                }
            }
            frame::ACCEPT => {
                if state == PeerState::Connecting {
                    if let Some(remote) = self.peers.get_mut(&peer) {
                        remote.state = PeerState::Connected;
                    }
                    let (host, port) = match &self.role {
                        Role::Connector { host, port } => (host.clone(), *port),
                        Role::Listener { .. } => return,
                    };
                    debug!(peer, %host, port, "connected to server");
                    self.pending
                        .push_back(TransportEvent::Connect(PeerInfo { id: peer, host, port }));
                }
            }
            frame::DATA => {
                if state != PeerState::Connected {
                    trace!(peer, "data before handshake ignored");
                    return;
                }
                if body.len() < DATA_HEADER_SIZE - 1 {
                    trace!(peer, len = body.len(), "truncated data frame ignored");
                    return;
                }
                let Some(delivery) = Delivery::from_u8(body[1]) else {
                    trace!(peer, delivery = body[1], "unknown delivery flag, frame ignored");
                    return;
                };
                self.pending.push_back(TransportEvent::Receive {
                    peer,
                    channel: body[0],
                    delivery,
                    payload: body[2..].to_vec(),
                });
            }
            frame::DISCONNECT => {
                let code = body
                    .get(..4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .unwrap_or(0);
                self.remove_peer(peer);
                debug!(peer, code, "peer disconnected");
                self.pending.push_back(TransportEvent::Disconnect { peer, code });
            }
            frame::PING => {}
            other => trace!(peer, kind = other, "unknown frame kind ignored"),
        }
    }

    /// Timeouts, connect retries, keep-alive pings.
    fn maintain(&mut self, now: Instant, timeout: Duration) {
        let ping_interval = (timeout / 4).max(MIN_PING_INTERVAL);

        let expired: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_received) > timeout)
            .map(|(&id, _)| id)
            .collect();

        for peer in expired {
            self.remove_peer(peer);
            debug!(peer, "peer timed out");
            self.pending.push_back(TransportEvent::Timeout { peer });
        }

        let due: Vec<(PeerId, u8)> = self
            .peers
            .iter()
            .filter_map(|(&id, p)| {
                let idle = now.saturating_duration_since(p.last_sent);
                match p.state {
                    PeerState::Connecting if idle >= CONNECT_RETRY_INTERVAL => {
                        Some((id, frame::CONNECT))
                    }
                    PeerState::Connected if idle >= ping_interval => Some((id, frame::PING)),
                    _ => None,
                }
            })
            .collect();

        for (peer, kind) in due {
            if let Err(e) = self.send_control(peer, kind, &[], now) {
                trace!(peer, kind, error = %e, "control frame not sent");
            }
        }
    }
}

/// UDP adapter for [`Transport`], driven by `service()`.
///
/// A listener binds `bind_ip:port` (all interfaces by default); a connector
/// binds an ephemeral port of the server's address family and reports the
/// server as peer `0`.
pub struct UdpTransport {
    host: Option<Host>,
    timeout: Duration,
    bind_ip: IpAddr,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            host: None,
            timeout: DEFAULT_TIMEOUT,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// Listen on a specific interface instead of all of them.
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Bound socket address while started. Useful after listening on port `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.host.as_ref().and_then(|h| h.socket.local_addr().ok())
    }

    /// Number of peers currently tracked, including one still connecting.
    pub fn peer_count(&self) -> usize {
        self.host.as_ref().map_or(0, |h| h.peers.len())
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UdpTransport {
    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn start_listen(&mut self, port: u16, max_peers: usize) -> Result<(), TransportError> {
        if self.host.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let addr = SocketAddr::new(self.bind_ip, port);
        let host = Host::open(addr, Role::Listener { max_peers }).map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                TransportError::AddressInUse(port)
            } else {
                TransportError::Io(e)
            }
        })?;

        debug!(%addr, max_peers, "udp listener started");
        self.host = Some(host);
        Ok(())
    }

    fn start_connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.host.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let resolve_error = || TransportError::AddressResolution(format!("{host}:{port}"));
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| resolve_error())?
            .collect();
        let server = candidates
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(resolve_error)?;

        let local = match server {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };

        let role = Role::Connector {
            host: host.to_string(),
            port,
        };
        let mut udp = Host::open(local, role)?;

        let now = Instant::now();
        udp.peers.insert(
            0,
            RemotePeer {
                addr: server,
                state: PeerState::Connecting,
                last_received: now,
                last_sent: now,
            },
        );
        udp.by_addr.insert(server, 0);
        udp.send_control(0, frame::CONNECT, &[], now)?;

        debug!(%server, "udp connect started");
        self.host = Some(udp);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(mut host) = self.host.take() else {
            return;
        };

        let now = Instant::now();
        let connected: Vec<PeerId> = host
            .peers
            .iter()
            .filter(|(_, p)| p.state == PeerState::Connected)
            .map(|(&id, _)| id)
            .collect();

        for peer in connected {
            if let Err(e) = host.send_control(peer, frame::DISCONNECT, &0u32.to_le_bytes(), now) {
                trace!(peer, error = %e, "disconnect notice not sent");
            }
        }
        debug!("udp transport stopped");
    }

    fn is_started(&self) -> bool {
        self.host.is_some()
    }

    fn service(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        let Some(host) = self.host.as_mut() else {
            return Ok(None);
        };

        if let Some(event) = host.pending.pop_front() {
            return Ok(Some(event));
        }

        host.poll_socket()?;
        let now = Instant::now();
        host.receive(now)?;
        host.maintain(now, self.timeout);

        Ok(host.pending.pop_front())
    }

    fn send(
        &mut self,
        peer: PeerId,
        channel: u8,
        payload: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        let host = self.host.as_mut().ok_or(TransportError::NotStarted)?;

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let addr = match host.peers.get(&peer) {
            Some(p) if p.state == PeerState::Connected => p.addr,
            _ => return Err(TransportError::UnknownPeer(peer)),
        };

        host.send_frame(addr, &[frame::DATA, channel, delivery as u8], payload)?;
        if let Some(remote) = host.peers.get_mut(&peer) {
            remote.last_sent = Instant::now();
        }
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId, reason_code: u32) -> Result<(), TransportError> {
        let host = self.host.as_mut().ok_or(TransportError::NotStarted)?;

        if !host.peers.contains_key(&peer) {
            return Err(TransportError::UnknownPeer(peer));
        }

        let sent = host.send_control(
            peer,
            frame::DISCONNECT,
            &reason_code.to_le_bytes(),
            Instant::now(),
        );
        host.remove_peer(peer);
        debug!(peer, reason_code, "peer disconnected locally");
        sent.map_err(TransportError::from)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
fn tune_socket_buffers(socket: &UdpSocket) {
    use std::os::unix::io::AsRawFd;

    let fd = socket.as_raw_fd();
    let optval: libc::c_int = SOCKET_BUFFER_SIZE;
    // Error diabaikan - tidak semua platform mengizinkan ukuran ini
    for option in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        // SAFETY: fd valid selama socket hidup, optval hidup sepanjang call
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
}

#[cfg(not(unix))]
fn tune_socket_buffers(_socket: &UdpSocket) {}
