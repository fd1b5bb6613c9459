//! Which end of the connection we are.

use std::fmt;

use crate::error::Result;
use crate::protocol::mask::generate_mask_key;

/// WebSocket connection role.
///
/// Determines masking behavior per RFC 6455 Section 5.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Client role: masks every outgoing frame.
    Client,
    /// Server role: never masks.
    Server,
}

impl Role {
    /// Clients must mask all frames sent to servers.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Servers expect masked frames from clients.
    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }

    /// Masking key for the next outgoing frame: fresh and random for clients,
    /// `None` for servers.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the system random source is unavailable.
    pub fn next_mask(&self) -> Result<Option<[u8; 4]>> {
        if self.must_mask() {
            generate_mask_key().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("Client"),
            Role::Server => f.write_str("Server"),
        }
    }
}
