//! Session Layer: client/server di atas transport
//!
//! Alur per tick:
//! transport.service() → connection table / registry dispatch → SessionEvent
//!
//! Fitur:
//! - Typed message dispatch lewat [`MessageRegistry`]
//! - Connection table per peer (server)
//! - Disconnect reason dibawa sampai ke remote side
//! - Notifikasi sebagai event queue, bukan callback

mod client;
mod config;
mod connection;
mod event;
mod registry;
mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use client::Client;
pub use config::{
    ClientConfig, ServerConfig, DEFAULT_HOST, DEFAULT_MAX_CLIENTS, DEFAULT_MAX_EVENTS_PER_TICK,
    DEFAULT_PORT,
};
pub use connection::{Connection, ConnectionTable, Link};
pub use event::{SessionEvent, SessionState};
pub use registry::{Context, Dispatch, HandlerFailure, MessageRegistry, Rejection};
pub use server::Server;
