//! Connection lifecycle.

use std::fmt;

/// Lifecycle state of a WebSocket connection.
///
/// `Unestablished -> Handshaking -> Open -> Closing -> Closed`. Any protocol error
/// moves a connection straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Transport exists but no upgrade has been attempted.
    #[default]
    Unestablished,
    /// Upgrade handshake in progress.
    Handshaking,
    /// Handshake complete; frames flow in both directions.
    Open,
    /// A close frame was sent or received; waiting for the other direction.
    Closing,
    /// Both close frames exchanged, end of stream seen, or a fatal error occurred.
    Closed,
}

impl ConnectionState {
    /// Frames may be sent while `Open`, and while `Closing` so a received close
    /// can be answered.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    /// State after a close frame travels in one direction. `peer_done` tells whether
    /// the opposite direction has already carried one.
    #[must_use]
    pub const fn after_close(self, peer_done: bool) -> Self {
        match self {
            ConnectionState::Closed => ConnectionState::Closed,
            _ if peer_done => ConnectionState::Closed,
            _ => ConnectionState::Closing,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unestablished => "Unestablished",
            ConnectionState::Handshaking => "Handshaking",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}
