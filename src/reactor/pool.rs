//! Fixed set of worker reactors with round-robin selection.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Reactor, SocketId};
use crate::config::PoolConfig;
use crate::error::Result;

/// One worker loop of a [`ReactorPool`].
///
/// Cheap to clone; every clone shares the same reactor, which therefore outlives any
/// connection handed to it.
#[derive(Clone)]
pub struct ReactorSlot {
    index: usize,
    reactor: Arc<dyn Reactor>,
}

impl ReactorSlot {
    pub fn new(index: usize, reactor: Arc<dyn Reactor>) -> Self {
        Self { index, reactor }
    }

    /// Position of this slot in its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn reactor(&self) -> &Arc<dyn Reactor> {
        &self.reactor
    }
}

impl fmt::Debug for ReactorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorSlot")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// The ordered worker slots of an acceptor plus its round-robin cursor.
///
/// The cursor always lies in `0..len()`.
#[derive(Debug)]
pub struct ReactorPool {
    slots: Vec<ReactorSlot>,
    cursor: usize,
}

impl ReactorPool {
    /// Build `config.size` slots, calling `factory(index, thread_name)` once per
    /// slot in index order.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPoolSize` for a zero size, or the first error from
    /// `factory`.
    pub fn new<F>(config: &PoolConfig, mut factory: F) -> Result<Self>
    where
        F: FnMut(usize, &str) -> Result<Arc<dyn Reactor>>,
    {
        config.validate()?;
        let slots = (0..config.size)
            .map(|index| {
                let name = config.worker_name(index);
                factory(index, &name).map(|reactor| ReactorSlot::new(index, reactor))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(size = slots.len(), "reactor pool created");
        Ok(Self { slots, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false: a pool holds at least one slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&ReactorSlot> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[ReactorSlot] {
        &self.slots
    }

    /// Index the next round-robin pick will return.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The slot already watching `socket`, if any.
    pub fn affinity(&self, socket: SocketId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.reactor.has(socket))
    }

    /// Return the slot under the cursor and advance it, wrapping at `len()`.
    pub fn next_round_robin(&mut self) -> usize {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots.len();
        index
    }

    /// Affinity first, then round-robin. The cursor only moves on a round-robin pick.
    pub fn select(&mut self, socket: SocketId) -> usize {
        match self.affinity(socket) {
            Some(index) => {
                debug!(%socket, slot = index, "slot chosen by affinity");
                index
            }
            None => self.next_round_robin(),
        }
    }
}
