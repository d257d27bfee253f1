//! Disconnect reason codes
//!
//! Dibawa sebagai out-of-band data (32-bit) pada event disconnect transport.
//!
//! | code   | reason                 | origin |
//! |--------|------------------------|--------|
//! | `0x00` | `LocalStopped`         | local  |
//! | `0x01` | `Timeout`              | local  |
//! | `0xF0` | `RemotelyDisconnected` | remote |
//! | `0xF1` | `ServerClosing`        | remote |
//! | `0xF2` | `RemoteError`          | remote |
//!
//! Remote side hanya boleh mengirim kode `0xF0..=0xF2`. Kode lain
//! (termasuk `0`/`1` dan nilai sembarang) dibaca sebagai `RemotelyDisconnected`.

use std::fmt;

/// Why a session or a peer connection ended.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoppedReason {
    /// The local side called `stop()`.
    LocalStopped = 0x00,
    /// The transport stopped hearing from the remote peer.
    Timeout = 0x01,
    /// The remote side disconnected without a more specific reason.
    RemotelyDisconnected = 0xF0,
    /// The server is shutting down.
    ServerClosing = 0xF1,
    /// The remote side rejected our traffic.
    RemoteError = 0xF2,
}

impl StoppedReason {
    /// Code carried on the wire.
    #[inline(always)]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decode a code received from a remote disconnect event.
    #[inline]
    pub const fn from_remote_code(code: u32) -> Self {
        match code {
            0xF1 => Self::ServerClosing,
            0xF2 => Self::RemoteError,
            _ => Self::RemotelyDisconnected,
        }
    }

    /// Whether this reason may legitimately arrive from the remote side.
    pub const fn is_remote(self) -> bool {
        matches!(
            self,
            Self::RemotelyDisconnected | Self::ServerClosing | Self::RemoteError
        )
    }
}

impl fmt::Display for StoppedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LocalStopped => "stopped locally",
            Self::Timeout => "timed out",
            Self::RemotelyDisconnected => "remotely disconnected",
            Self::ServerClosing => "server closing",
            Self::RemoteError => "remote error",
        };
        write!(f, "{text} (0x{:02X})", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_codes() {
        assert_eq!(StoppedReason::LocalStopped.code(), 0);
        assert_eq!(StoppedReason::Timeout.code(), 1);
        assert_eq!(StoppedReason::RemotelyDisconnected.code(), 0xF0);
        assert_eq!(StoppedReason::ServerClosing.code(), 0xF1);
        assert_eq!(StoppedReason::RemoteError.code(), 0xF2);
    }

    #[test]
    fn test_remote_decoding() {
        assert_eq!(
            StoppedReason::from_remote_code(0xF1),
            StoppedReason::ServerClosing
        );
        assert_eq!(
            StoppedReason::from_remote_code(0xF2),
            StoppedReason::RemoteError
        );

        // Local-only and unknown codes collapse to RemotelyDisconnected
        for code in [0x00, 0x01, 0xF0, 0xF3, 0xFF, u32::MAX] {
            assert_eq!(
                StoppedReason::from_remote_code(code),
                StoppedReason::RemotelyDisconnected
            );
        }
    }

    #[test]
    fn test_remote_round_trip() {
        for reason in [
            StoppedReason::RemotelyDisconnected,
            StoppedReason::ServerClosing,
            StoppedReason::RemoteError,
        ] {
            assert!(reason.is_remote());
            assert_eq!(StoppedReason::from_remote_code(reason.code()), reason);
        }
        assert!(!StoppedReason::Timeout.is_remote());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            StoppedReason::ServerClosing.to_string(),
            "server closing (0xF1)"
        );
    }
}
