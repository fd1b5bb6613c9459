//! Error types for the acceptor and the WebSocket protocol engine.
//!
//! Every failure the crate can report is a variant of [`Error`]. Variants fall into
//! four categories (see [`ErrorCategory`]): configuration, handshake, protocol and
//! transport. A non-blocking operation that cannot complete yet is *not* an error; it
//! is reported through [`Progress::WouldBlock`](crate::Progress::WouldBlock).

use std::io;

use thiserror::Error;

use crate::close::CloseCode;

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid construction parameters. Fatal at construction.
    Configuration,
    /// The upgrade handshake failed. The transport is left intact.
    Handshake,
    /// The peer (or caller) violated RFC 6455 framing. The connection is unusable.
    Protocol,
    /// The underlying transport failed or timed out.
    Transport,
}

/// Errors that can occur while accepting, upgrading or framing connections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A reactor pool must contain at least one reactor.
    #[error("Invalid reactor pool size: {0} (must be at least 1)")]
    InvalidPoolSize(usize),

    /// The request lacks `Upgrade: websocket` / `Connection: Upgrade`, or the server
    /// did not answer with `101 Switching Protocols`.
    #[error("No WebSocket handshake: {0}")]
    NoHandshake(String),

    /// The request carries no `Sec-WebSocket-Version` header.
    #[error("Missing Sec-WebSocket-Version header")]
    NoVersion,

    /// The requested WebSocket version is not 13.
    #[error("Unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),

    /// The request carries no valid `Sec-WebSocket-Key` header.
    #[error("Missing or invalid Sec-WebSocket-Key: {0}")]
    NoKey(String),

    /// The server's `Sec-WebSocket-Accept` is missing or does not match the key.
    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,

    /// Authentication was required and the credentials were missing or rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// Malformed HTTP head during the handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// The handshake head exceeds the configured limit.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reserved bits set without a negotiated extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(u64),

    /// Payload exceeds the configured maximum or the supplied buffer.
    #[error("Payload too big: {size} bytes (max: {max})")]
    PayloadTooBig {
        /// Announced payload length.
        size: u64,
        /// Maximum accepted length.
        max: u64,
    },

    /// 64-bit payload length with the most significant bit set.
    #[error("Invalid payload length: {0:#x}")]
    InvalidPayloadLength(u64),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// The peer closed the transport in the middle of a frame.
    #[error("Incomplete frame: peer closed after {received} of {expected} bytes")]
    IncompleteFrame {
        /// Bytes of the frame received.
        received: usize,
        /// Bytes the frame needs in total (header + payload), if known.
        expected: usize,
    },

    /// A non-blocking call was repeated with arguments that differ from the
    /// interrupted one.
    #[error("Retried call does not match the pending frame: {0}")]
    RetryMismatch(String),

    /// Close code that must not be sent on the wire.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// The connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A blocking operation did not complete within the configured timeout.
    #[error("Operation timed out")]
    Timeout,

    /// I/O error reported by the transport.
    #[error("I/O error: {1}")]
    Io(io::ErrorKind, String),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidPoolSize(_) => ErrorCategory::Configuration,
            Error::NoHandshake(_)
            | Error::NoVersion
            | Error::UnsupportedVersion(_)
            | Error::NoKey(_)
            | Error::AcceptMismatch
            | Error::Unauthorized
            | Error::InvalidHandshake(_)
            | Error::HandshakeTooLarge { .. } => ErrorCategory::Handshake,
            Error::ReservedBitsSet
            | Error::ReservedOpcode(_)
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::PayloadTooBig { .. }
            | Error::InvalidPayloadLength(_)
            | Error::UnmaskedClientFrame
            | Error::MaskedServerFrame
            | Error::IncompleteFrame { .. }
            | Error::RetryMismatch(_)
            | Error::InvalidCloseCode(_) => ErrorCategory::Protocol,
            Error::ConnectionClosed | Error::Timeout | Error::Io(..) => ErrorCategory::Transport,
        }
    }

    /// Whether this is a framing violation that leaves the connection unusable.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self.category(), ErrorCategory::Protocol)
    }

    /// Status code to put in the close frame sent in response to this error, if any.
    #[must_use]
    pub const fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::PayloadTooBig { .. } => Some(CloseCode::MessageTooBig),
            Error::ReservedBitsSet
            | Error::ReservedOpcode(_)
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::InvalidPayloadLength(_)
            | Error::UnmaskedClientFrame
            | Error::MaskedServerFrame => Some(CloseCode::ProtocolError),
            _ => None,
        }
    }

    /// The I/O error kind, for transport errors.
    #[must_use]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(kind, _) => Some(*kind),
            Error::Timeout => Some(io::ErrorKind::TimedOut),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Error::Timeout,
            kind => Error::Io(kind, err.to_string()),
        }
    }
}
