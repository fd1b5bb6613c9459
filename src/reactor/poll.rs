//! `mio`-backed reactor running on its own thread.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, ErrorKind};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use mio::event::Event;
use mio::unix::SourceFd;
use mio::{Events, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::{EventHandler, Interest, Reactor, SocketId};
use crate::error::{Error, Result};

const WAKE_TOKEN: Token = Token(usize::MAX);
const INITIAL_EVENTS: usize = 64;

type SharedHandler = Arc<Mutex<Box<dyn EventHandler>>>;

#[derive(Clone)]
struct Entry {
    interest: Interest,
    handler: SharedHandler,
}

struct Shared {
    name: String,
    registry: Registry,
    waker: Waker,
    handlers: Mutex<HashMap<SocketId, Entry>>,
    running: AtomicBool,
}

/// A [`Reactor`] driving a `mio::Poll` on a dedicated, named thread.
///
/// Readiness is level-triggered from the handler's point of view: after a handler
/// returns, its socket is re-armed, so a socket that is still ready is reported
/// again on the next wait. A handler can therefore do one `accept()` or one read per
/// call without losing readiness.
pub struct PollReactor {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PollReactor {
    /// Spawn the reactor thread named `name`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the poller, the waker or the thread cannot be created.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let shared = Arc::new(Shared {
            name: name.clone(),
            registry,
            waker,
            handlers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        });

        let thread = thread::Builder::new().name(name.clone()).spawn({
            let shared = Arc::clone(&shared);
            move || run(poll, &shared)
        })?;
        debug!(reactor = %name, "reactor started");

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Thread name of this reactor.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of registered sockets.
    pub fn len(&self) -> usize {
        self.shared.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the loop, join its thread and drop every handler.
    ///
    /// Called from a handler, the loop exits after that handler returns and the
    /// thread is not joined.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.shared.waker.wake() {
                error!(reactor = %self.shared.name, error = %e, "failed to wake reactor for shutdown");
            }
        }

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!(reactor = %self.shared.name, "reactor thread panicked");
            }
        }

        let handlers = std::mem::take(&mut *self.shared.handlers.lock());
        for socket in handlers.keys() {
            let _ = self.shared.registry.deregister(&mut SourceFd(&raw_fd(*socket)));
        }
        if !handlers.is_empty() {
            debug!(reactor = %self.shared.name, count = handlers.len(), "dropped registrations");
        }
        drop(handlers);
    }
}

impl Reactor for PollReactor {
    fn register(
        &self,
        socket: SocketId,
        interest: Interest,
        handler: Box<dyn EventHandler>,
    ) -> Result<()> {
        let mut handlers = self.shared.handlers.lock();
        if handlers.contains_key(&socket) {
            return Err(Error::Io(
                ErrorKind::AlreadyExists,
                format!("{socket} is already registered"),
            ));
        }
        self.shared
            .registry
            .register(&mut SourceFd(&raw_fd(socket)), token(socket), interest.into())?;
        handlers.insert(
            socket,
            Entry {
                interest,
                handler: Arc::new(Mutex::new(handler)),
            },
        );
        debug!(reactor = %self.shared.name, %socket, ?interest, "registered");
        Ok(())
    }

    fn modify(&self, socket: SocketId, interest: Interest) -> Result<()> {
        let mut handlers = self.shared.handlers.lock();
        let entry = handlers.get_mut(&socket).ok_or_else(|| not_registered(socket))?;
        self.shared
            .registry
            .reregister(&mut SourceFd(&raw_fd(socket)), token(socket), interest.into())?;
        entry.interest = interest;
        trace!(reactor = %self.shared.name, %socket, ?interest, "modified");
        Ok(())
    }

    fn unregister(&self, socket: SocketId) -> Result<()> {
        let entry = self
            .shared
            .handlers
            .lock()
            .remove(&socket)
            .ok_or_else(|| not_registered(socket))?;
        // The descriptor may already be closed; the kernel drops closed
        // descriptors from the interest list on its own.
        if let Err(e) = self.shared.registry.deregister(&mut SourceFd(&raw_fd(socket))) {
            trace!(reactor = %self.shared.name, %socket, error = %e, "deregister failed");
        }
        debug!(reactor = %self.shared.name, %socket, "unregistered");
        drop(entry);
        Ok(())
    }

    fn has(&self, socket: SocketId) -> bool {
        self.shared.handlers.lock().contains_key(&socket)
    }

    fn wake(&self) -> Result<()> {
        self.shared.waker.wake()?;
        Ok(())
    }
}

impl Drop for PollReactor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for PollReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollReactor")
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("registered", &self.len())
            .finish()
    }
}

fn run(mut poll: Poll, shared: &Shared) {
    let mut capacity = INITIAL_EVENTS;
    let mut events = Events::with_capacity(capacity);

    while shared.running.load(Ordering::Acquire) {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == ErrorKind::Interrupted {
                continue;
            }
            error!(reactor = %shared.name, error = %e, "poll failed");
            break;
        }

        let mut received = 0;
        for event in events.iter() {
            received += 1;
            if event.token() == WAKE_TOKEN {
                continue;
            }
            shared.dispatch(SocketId(event.token().0 as u64), event);
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
        }

        if received == capacity {
            capacity *= 2;
            events = Events::with_capacity(capacity);
            trace!(reactor = %shared.name, capacity, "grew event buffer");
        }
    }
    debug!(reactor = %shared.name, "reactor stopped");
}

impl Shared {
    fn dispatch(&self, socket: SocketId, event: &Event) {
        let Some(entry) = self.handlers.lock().get(&socket).cloned() else {
            return;
        };

        {
            let mut handler = entry.handler.lock();
            if event.is_error() {
                handler.error();
            } else {
                if event.is_readable() || event.is_read_closed() {
                    handler.readable();
                }
                if event.is_writable() || event.is_write_closed() {
                    handler.writable();
                }
            }
        }

        self.rearm(socket, &entry.handler);
    }

    /// Re-arm `socket` if the handler that just ran is still the registered one.
    fn rearm(&self, socket: SocketId, handler: &SharedHandler) {
        let handlers = self.handlers.lock();
        let Some(current) = handlers.get(&socket) else {
            return;
        };
        if !Arc::ptr_eq(&current.handler, handler) {
            return;
        }
        if let Err(e) =
            self.registry
                .reregister(&mut SourceFd(&raw_fd(socket)), token(socket), current.interest.into())
        {
            debug!(reactor = %self.name, %socket, error = %e, "re-arm failed");
        }
    }
}

impl From<Interest> for mio::Interest {
    fn from(interest: Interest) -> Self {
        match (interest.is_readable(), interest.is_writable()) {
            (true, true) => mio::Interest::READABLE | mio::Interest::WRITABLE,
            (false, true) => mio::Interest::WRITABLE,
            _ => mio::Interest::READABLE,
        }
    }
}

fn token(socket: SocketId) -> Token {
    Token(socket.0 as usize)
}

fn raw_fd(socket: SocketId) -> RawFd {
    socket.0 as RawFd
}

fn not_registered(socket: SocketId) -> Error {
    io::Error::new(ErrorKind::NotFound, format!("{socket} is not registered")).into()
}
