//! WebSocket connection management and state machine.
//!
//! This module provides [`WebSocket`], the frame-level connection over a
//! [`Transport`](crate::transport::Transport), and the handshake drivers that
//! produce one.
//!
//! ## Connection Lifecycle
//!
//! 1. **Handshaking** - [`accept`] or [`connect`] negotiates the upgrade
//! 2. **Open** - frames flow both ways
//! 3. **Closing** - one side has sent a close frame
//! 4. **Closed** - both close frames exchanged, the stream ended, or a protocol error
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::net::TcpStream;
//! use wsmux::{Config, FrameFlags, connection::connect, protocol::ClientRequest};
//!
//! # fn main() -> wsmux::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:9001")?;
//! let request = ClientRequest::new("/", "127.0.0.1:9001")?;
//! let mut ws = connect(stream, request, &Config::client()).map_err(|f| f.error)?;
//!
//! let _ = ws.send_frame(b"hello", FrameFlags::TEXT)?;
//! let mut buf = [0u8; 1024];
//! let _ = ws.receive_frame(&mut buf)?;
//! let _ = ws.shutdown_default()?;
//! # Ok(())
//! # }
//! ```

mod progress;
mod role;
mod state;
mod upgrade;
mod websocket;

pub use progress::Progress;
pub use role::Role;
pub use state::ConnectionState;
pub use upgrade::{HandshakeFailure, accept, connect, reject, reject_error};
pub use websocket::WebSocket;
