//! Event loops and the multi-reactor acceptor.
//!
//! A [`Reactor`] is one event loop bound to one thread. It watches sockets by
//! [`SocketId`] and calls the registered [`EventHandler`] on that thread when a socket
//! becomes ready. The [`Acceptor`] owns a listening socket and spreads accepted
//! connections over a [`ReactorPool`].

use std::ops::BitOr;

use crate::error::Result;

mod acceptor;
#[cfg(unix)]
mod poll;
mod pool;

pub use acceptor::{Acceptor, ServiceFactory};
#[cfg(unix)]
pub use poll::PollReactor;
pub use pool::{ReactorPool, ReactorSlot};

pub use crate::transport::SocketId;

/// Readiness a registration waits for. Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(0b01);
    pub const WRITABLE: Interest = Interest(0b10);
    pub const BOTH: Interest = Interest(0b11);

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// Callback invoked by a reactor on its own thread.
///
/// Any `FnMut() + Send` closure is a handler that runs for every kind of event.
pub trait EventHandler: Send {
    /// The socket is readable, or the peer closed its write half.
    fn readable(&mut self);

    /// The socket is writable.
    fn writable(&mut self) {}

    /// The socket reported an error condition.
    fn error(&mut self) {}
}

impl<F> EventHandler for F
where
    F: FnMut() + Send,
{
    fn readable(&mut self) {
        self()
    }

    fn writable(&mut self) {
        self()
    }

    fn error(&mut self) {
        self()
    }
}

/// A single-threaded event loop.
///
/// Every method may be called from any thread. Handlers run on the reactor's thread
/// and may call back into the reactor, including unregistering their own socket.
pub trait Reactor: Send + Sync {
    /// Start watching `socket` and call `handler` on readiness.
    ///
    /// # Errors
    ///
    /// Fails with an `AlreadyExists` transport error if `socket` is already
    /// registered, or with the OS error from the readiness API.
    fn register(
        &self,
        socket: SocketId,
        interest: Interest,
        handler: Box<dyn EventHandler>,
    ) -> Result<()>;

    /// Change what a registered socket waits for.
    ///
    /// # Errors
    ///
    /// Fails with a `NotFound` transport error if `socket` is not registered.
    fn modify(&self, socket: SocketId, interest: Interest) -> Result<()>;

    /// Stop watching `socket` and drop its handler.
    ///
    /// # Errors
    ///
    /// Fails with a `NotFound` transport error if `socket` is not registered.
    fn unregister(&self, socket: SocketId) -> Result<()>;

    /// Whether `socket` is registered.
    fn has(&self, socket: SocketId) -> bool;

    /// Interrupt the loop's current wait so it re-evaluates its watch set.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the wake signal cannot be delivered.
    fn wake(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_bits() {
        assert!(Interest::READABLE.is_readable());
        assert!(!Interest::READABLE.is_writable());
        assert_eq!(Interest::READABLE | Interest::WRITABLE, Interest::BOTH);
        assert!(Interest::BOTH.is_readable() && Interest::BOTH.is_writable());
    }

    #[test]
    fn test_closure_handler() {
        let mut calls = 0;
        {
            let mut handler = || calls += 1;
            EventHandler::readable(&mut handler);
            EventHandler::writable(&mut handler);
            EventHandler::error(&mut handler);
        }
        assert_eq!(calls, 3);
    }
}
