//! # wsmux - multi-reactor acceptor and RFC 6455 WebSocket engine
//!
//! `wsmux` is a small socket-server toolkit built from two halves:
//!
//! - an [`Acceptor`] that owns a listening socket and spreads accepted connections
//!   over a pool of single-threaded event loops ([`Reactor`]), round-robin with
//!   affinity for sockets a loop already watches;
//! - a [`WebSocket`] engine that performs the upgrade handshake (optionally with HTTP
//!   Basic or Digest authentication) and exchanges frames over blocking or
//!   non-blocking transports.
//!
//! ## Features
//!
//! - **Resumable non-blocking I/O**: a stalled send or receive returns
//!   [`Progress::WouldBlock`] and resumes where it stopped on the next identical call
//! - **Strict RFC 6455 validation**: reserved bits, reserved opcodes, control frame
//!   rules, masking direction and payload limits
//! - **Pluggable event loops** through the [`Reactor`] trait, with a `mio`-based
//!   [`PollReactor`] on Unix
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::TcpListener;
//! use wsmux::{Config, FrameFlags, connection::accept};
//!
//! # fn main() -> wsmux::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:9001")?;
//! let (stream, _) = listener.accept()?;
//! let mut ws = accept(stream, &Config::server()).map_err(|f| f.error)?;
//!
//! let mut buf = vec![0u8; 64 * 1024];
//! while let Some((len, flags)) = ws.receive_frame(&mut buf)?.complete() {
//!     if len == 0 && flags.is_empty() {
//!         break;
//!     }
//!     let _ = ws.send_frame(&buf[..len], flags)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod close;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod reactor;
pub mod transport;

pub use close::{CloseCode, CloseFrame};
pub use config::{Config, Limits, PoolConfig, Timeouts};
pub use connection::{ConnectionState, HandshakeFailure, Progress, Role, WebSocket};
pub use error::{Error, ErrorCategory, Result};
pub use protocol::{
    ClientRequest, Credentials, FrameFlags, HandshakeRequest, HandshakeResponse, OpCode,
    WS_GUID, compute_accept_key,
};
#[cfg(unix)]
pub use reactor::PollReactor;
pub use reactor::{Acceptor, EventHandler, Interest, Reactor, ReactorPool, ReactorSlot, ServiceFactory};
pub use transport::{AsSocketId, Listener, SocketId, Transport};

#[cfg(test)]
mod tests {
    use std::net::TcpStream;

    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<Config>();
        assert_send::<Limits>();
        assert_send::<PoolConfig>();
        assert_send::<CloseCode>();
        assert_send::<CloseFrame>();
        assert_send::<ConnectionState>();
        assert_send::<Role>();
        assert_send::<WebSocket<TcpStream>>();
        assert_send::<HandshakeFailure<TcpStream>>();
        assert_send::<ReactorSlot>();
    }

    #[test]
    fn test_public_types_are_sync() {
        assert_sync::<Error>();
        assert_sync::<Config>();
        assert_sync::<Limits>();
        assert_sync::<CloseCode>();
        assert_sync::<CloseFrame>();
        assert_sync::<ConnectionState>();
        assert_sync::<Role>();
        assert_sync::<ReactorSlot>();
    }

    #[cfg(unix)]
    #[test]
    fn test_poll_reactor_is_shareable() {
        assert_send::<PollReactor>();
        assert_sync::<PollReactor>();
    }
}
