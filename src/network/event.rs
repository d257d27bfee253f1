//! Session lifecycle state and notifications.

use crate::protocol::StoppedReason;
use crate::transport::PeerId;

/// Lifecycle of a session.
///
/// `Idle → Starting → Started → (Connected, client only) → Stopping → Idle`.
/// `Starting` and `Stopping` are only observable from inside `start()` and
/// `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Started,
    Connected,
    Stopping,
}

/// Notification queued by a session, drained with `next_event()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport is up (listening, or connecting).
    Started,
    /// Client only: the server accepted the connection.
    Connected,
    /// The session went back to idle.
    Stopped(StoppedReason),
    /// Server only: a peer joined the connection table.
    PeerConnected(PeerId),
    /// Server only: a peer left the connection table.
    PeerDisconnected { id: PeerId, reason: StoppedReason },
}
