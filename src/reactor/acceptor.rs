//! Listening socket that spreads accepted connections over a reactor pool.

use std::fmt;
use std::io::ErrorKind;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{Interest, Reactor, ReactorPool, ReactorSlot, SocketId};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::transport::{AsSocketId, Listener};

/// Per-connection strategy of an [`Acceptor`].
///
/// Both methods run under the acceptor's lock, one accepted socket at a time.
pub trait ServiceFactory<S>: Send + 'static {
    /// Take ownership of an accepted socket that will be served by `slot`.
    ///
    /// Typically registers a handler for `socket` with `slot.reactor()`.
    ///
    /// # Errors
    ///
    /// Any error is returned from [`Acceptor::on_accept`].
    fn create_handler(&mut self, socket: S, slot: &ReactorSlot) -> Result<()>;

    /// Pick the slot index for `socket`.
    ///
    /// The default reuses the slot already watching `socket` and otherwise takes the
    /// next slot in round-robin order.
    fn select_slot(&mut self, socket: SocketId, pool: &mut ReactorPool) -> usize {
        pool.select(socket)
    }
}

struct Inner<F> {
    pool: ReactorPool,
    factory: F,
    registered: Option<Arc<dyn Reactor>>,
}

/// Owns a listening socket and a [`ReactorPool`].
///
/// Each [`on_accept`](Self::on_accept) accepts one connection and hands it to one
/// pool slot through the [`ServiceFactory`]. With a primary reactor, the listening
/// socket is watched for readability and `on_accept` runs on the primary's thread.
pub struct Acceptor<L: Listener, F> {
    listener: L,
    listener_id: SocketId,
    primary: Option<Arc<dyn Reactor>>,
    inner: Mutex<Inner<F>>,
}

impl<L, F> Acceptor<L, F>
where
    L: Listener,
    F: ServiceFactory<L::Stream>,
{
    /// Create the pool by calling `reactor_factory(index, thread_name)` once per slot
    /// and, if `primary` is given, register the listening socket with it.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPoolSize` for a zero pool size, the first error from
    /// `reactor_factory`, or the registration error from `primary`.
    pub fn new<R>(
        listener: L,
        pool_config: &PoolConfig,
        reactor_factory: R,
        service_factory: F,
        primary: Option<Arc<dyn Reactor>>,
    ) -> Result<Arc<Self>>
    where
        R: FnMut(usize, &str) -> Result<Arc<dyn Reactor>>,
    {
        let pool = ReactorPool::new(pool_config, reactor_factory)?;
        let listener_id = listener.socket_id();
        let acceptor = Arc::new(Self {
            listener,
            listener_id,
            primary,
            inner: Mutex::new(Inner {
                pool,
                factory: service_factory,
                registered: None,
            }),
        });

        if let Some(primary) = acceptor.primary.clone() {
            acceptor.register_with(primary)?;
        }
        debug!(listener = %listener_id, pool = acceptor.pool_size(), "acceptor created");
        Ok(acceptor)
    }

    /// Accept one connection and assign it to a slot; returns the slot index.
    ///
    /// The primary reactor and then the chosen worker are woken before the service
    /// factory receives the socket.
    ///
    /// # Errors
    ///
    /// A failed `accept()` is returned as `Error::Io` and leaves the acceptor usable.
    /// Errors waking the worker or from the service factory are returned as is; the
    /// socket is dropped.
    pub fn on_accept(&self) -> Result<usize> {
        let socket = match self.listener.accept() {
            Ok(socket) => socket,
            Err(e) => {
                warn!(listener = %self.listener_id, error = %e, "accept failed");
                return Err(e.into());
            }
        };
        let socket_id = socket.socket_id();

        if let Some(primary) = &self.primary {
            if let Err(e) = primary.wake() {
                warn!(listener = %self.listener_id, error = %e, "failed to wake primary reactor");
            }
        }

        let mut inner = self.inner.lock();
        let Inner { pool, factory, .. } = &mut *inner;
        let index = factory.select_slot(socket_id, pool);
        let slot = pool.slot(index).cloned().ok_or_else(|| {
            Error::Io(
                ErrorKind::InvalidInput,
                format!("slot {index} out of range for pool of {}", pool.len()),
            )
        })?;

        slot.reactor().wake()?;
        factory.create_handler(socket, &slot)?;
        debug!(socket = %socket_id, slot = index, "connection assigned");
        Ok(index)
    }

    /// Watch the listening socket with `reactor`, calling [`on_accept`](Self::on_accept)
    /// on each readiness event.
    ///
    /// A no-op if `reactor` already watches the socket. Otherwise the socket is first
    /// detached from the reactor it was registered with.
    ///
    /// # Errors
    ///
    /// Returns the registration error from either reactor.
    pub fn register_with(self: &Arc<Self>, reactor: Arc<dyn Reactor>) -> Result<()> {
        let mut inner = self.inner.lock();
        if reactor.has(self.listener_id) {
            trace!(listener = %self.listener_id, "listener already registered");
            return Ok(());
        }
        if let Some(previous) = inner.registered.take() {
            detach(previous.as_ref(), self.listener_id)?;
        }

        let acceptor: Weak<Self> = Arc::downgrade(self);
        reactor.register(
            self.listener_id,
            Interest::READABLE,
            Box::new(move || {
                if let Some(acceptor) = acceptor.upgrade() {
                    // Already logged by on_accept.
                    let _ = acceptor.on_accept();
                }
            }),
        )?;
        inner.registered = Some(reactor);
        debug!(listener = %self.listener_id, "listener registered");
        Ok(())
    }
}

impl<L: Listener, F> Acceptor<L, F> {
    /// Stop watching the listening socket. A no-op when not registered.
    ///
    /// # Errors
    ///
    /// Returns the error from the reactor holding the socket.
    pub fn unregister(&self) -> Result<()> {
        let registered = self.inner.lock().registered.take();
        match registered {
            Some(reactor) => detach(reactor.as_ref(), self.listener_id),
            None => Ok(()),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.inner.lock().registered.is_some()
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_id(&self) -> SocketId {
        self.listener_id
    }

    pub fn pool_size(&self) -> usize {
        self.inner.lock().pool.len()
    }

    /// Index the next round-robin pick will return.
    pub fn cursor(&self) -> usize {
        self.inner.lock().pool.cursor()
    }

    pub fn slot(&self, index: usize) -> Option<ReactorSlot> {
        self.inner.lock().pool.slot(index).cloned()
    }

    /// Run `f` with the service factory while holding the acceptor's lock.
    pub fn with_factory<R>(&self, f: impl FnOnce(&mut F) -> R) -> R {
        f(&mut self.inner.lock().factory)
    }
}

impl<L: Listener, F> Drop for Acceptor<L, F> {
    fn drop(&mut self) {
        if let Some(reactor) = self.inner.get_mut().registered.take() {
            if let Err(e) = detach(reactor.as_ref(), self.listener_id) {
                warn!(listener = %self.listener_id, error = %e, "failed to unregister listener");
            }
        }
    }
}

impl<L: Listener, F> fmt::Debug for Acceptor<L, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("listener", &self.listener_id)
            .field("has_primary", &self.primary.is_some())
            .finish_non_exhaustive()
    }
}

fn detach(reactor: &dyn Reactor, listener: SocketId) -> Result<()> {
    if reactor.has(listener) {
        reactor.unregister(listener)?;
        debug!(%listener, "listener unregistered");
    }
    Ok(())
}
