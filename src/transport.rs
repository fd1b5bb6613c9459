//! Raw socket I/O consumed by the acceptor and the WebSocket engine.
//!
//! Data moves through `std::io::{Read, Write}`; `WouldBlock` is the non-blocking
//! signal. [`Transport`] adds the socket controls a connection needs.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::time::Duration;

/// Identity of an OS socket, used to key reactor registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Types backed by an OS socket.
pub trait AsSocketId {
    fn socket_id(&self) -> SocketId;
}

macro_rules! impl_as_socket_id {
    ($($ty:ty),* $(,)?) => {
        $(
            #[cfg(unix)]
            impl AsSocketId for $ty {
                fn socket_id(&self) -> SocketId {
                    SocketId(std::os::fd::AsRawFd::as_raw_fd(self) as u64)
                }
            }

            #[cfg(windows)]
            impl AsSocketId for $ty {
                fn socket_id(&self) -> SocketId {
                    SocketId(std::os::windows::io::AsRawSocket::as_raw_socket(self))
                }
            }
        )*
    };
}

impl_as_socket_id!(TcpStream, TcpListener);

#[cfg(unix)]
impl AsSocketId for std::os::unix::net::UnixStream {
    fn socket_id(&self) -> SocketId {
        SocketId(std::os::fd::AsRawFd::as_raw_fd(self) as u64)
    }
}

#[cfg(unix)]
impl AsSocketId for std::os::unix::net::UnixListener {
    fn socket_id(&self) -> SocketId {
        SocketId(std::os::fd::AsRawFd::as_raw_fd(self) as u64)
    }
}

/// A connected byte stream with socket controls.
pub trait Transport: Read + Write {
    /// Switch between blocking and non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Bound how long a blocking read waits. `None` waits forever.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Bound how long a blocking write waits. `None` waits forever.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shut down one or both halves of the stream.
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        TcpStream::shutdown(self, how)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, how)
    }
}

/// A listening socket.
pub trait Listener: AsSocketId + Send + Sync + 'static {
    /// Accepted connection type.
    type Stream: AsSocketId + Send + 'static;

    /// Accept one pending connection.
    fn accept(&self) -> io::Result<Self::Stream>;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept(&self) -> io::Result<TcpStream> {
        TcpListener::accept(self).map(|(stream, _)| stream)
    }
}

#[cfg(unix)]
impl Listener for std::os::unix::net::UnixListener {
    type Stream = std::os::unix::net::UnixStream;

    fn accept(&self) -> io::Result<Self::Stream> {
        std::os::unix::net::UnixListener::accept(self).map(|(stream, _)| stream)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_socket_ids_are_distinct() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let server = Listener::accept(&listener).unwrap();

        assert_ne!(listener.socket_id(), client.socket_id());
        assert_ne!(client.socket_id(), server.socket_id());
    }

    #[test]
    fn test_transport_controls() {
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        Transport::set_nonblocking(&a, true).unwrap();
        Transport::set_read_timeout(&a, Some(Duration::from_millis(10))).unwrap();
        Transport::shutdown(&a, Shutdown::Write).unwrap();
    }
}
