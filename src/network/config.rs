//! Session configuration.

use std::time::Duration;

use crate::protocol::{DEFAULT_BUFFER_SIZE, HEADER_SIZE};
use crate::transport::DEFAULT_TIMEOUT;

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_MAX_CLIENTS: usize = 10;
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Transport events serviced per `update()` call.
pub const DEFAULT_MAX_EVENTS_PER_TICK: usize = 64;

/// Configuration for a [`Server`](super::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Maximum number of connected peers. Extra connects are refused by
    /// the transport.
    pub max_clients: usize,

    /// Idle time before a silent peer is dropped
    pub timeout: Duration,

    /// Capacity of each half of the buffer pair
    pub buffer_size: usize,

    pub max_events_per_tick: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            timeout: DEFAULT_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_events_per_tick: DEFAULT_MAX_EVENTS_PER_TICK,
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Clamped so each buffer can hold at least a message id.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(HEADER_SIZE);
        self
    }

    /// Clamped to at least one event per tick.
    pub fn with_max_events_per_tick(mut self, max: usize) -> Self {
        self.max_events_per_tick = max.max(1);
        self
    }
}

/// Configuration for a [`Client`](super::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Idle time before the server is considered gone. Also bounds the
    /// connect attempt.
    pub timeout: Duration,

    pub buffer_size: usize,

    pub max_events_per_tick: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_events_per_tick: DEFAULT_MAX_EVENTS_PER_TICK,
        }
    }
}

impl ClientConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Clamped so each buffer can hold at least a message id.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(HEADER_SIZE);
        self
    }

    /// Clamped to at least one event per tick.
    pub fn with_max_events_per_tick(mut self, max: usize) -> Self {
        self.max_events_per_tick = max.max(1);
        self
    }
}
