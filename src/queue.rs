//! Engine-agnostic plumbing: the shared core and the consumer handle.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::marker::PhantomData;

use crate::index::SlotMap;
use crate::traits::{Fifo, PollerListener};

/// State shared by the appenders and the poller of one queue: the key→slot
/// index and the backing fifo of tokens.
pub(crate) struct Core<K, V, X, Q> {
    pub(crate) index: X,
    pub(crate) fifo: Q,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, X: SlotMap<K, V>, Q: Fifo<X::Token>> Core<K, V, X, Q> {
    pub(crate) fn new(index: X, fifo: Q) -> Self {
        Self {
            index,
            fifo,
            _marker: PhantomData,
        }
    }
}

/// Read side of a conflation queue.
///
/// Exactly one poller exists per queue; it is not cloneable. Poll order
/// follows the first-publication order of distinct keys: a key whose slot
/// was overwritten many times between its publication and its poll still
/// occupies exactly one position.
pub struct Poller<K, V, X, Q, L = ()> {
    core: Arc<Core<K, V, X, Q>>,
    listener: L,
}

impl<K, V, X, Q, L> Poller<K, V, X, Q, L>
where
    X: SlotMap<K, V>,
    Q: Fifo<X::Token>,
    L: PollerListener<K, V>,
{
    pub(crate) fn from_parts(core: Arc<Core<K, V, X, Q>>, listener: L) -> Self {
        Self { core, listener }
    }

    /// Take the next pending value in distinct-key fifo order.
    ///
    /// Returns `None` when no key is pending; an empty poll has no side
    /// effects.
    pub fn poll(&mut self) -> Option<Box<V>> {
        let token = self.core.fifo.poll()?;
        let value = self.core.index.with_token(&token, |slot| slot.take())?;
        self.listener.on_poll(self.core.index.key(&token), &value);
        Some(value)
    }

    /// Like [`poll`](Self::poll), but also returns the key the value was
    /// conflated under.
    pub fn poll_keyed(&mut self) -> Option<(K, Box<V>)>
    where
        K: Clone,
    {
        let token = self.core.fifo.poll()?;
        let value = self.core.index.with_token(&token, |slot| slot.take())?;
        let key = self.core.index.key(&token).clone();
        self.listener.on_poll(&key, &value);
        Some((key, value))
    }

    /// Take the next pending value, parking `spare` in the vacated slot.
    ///
    /// The parked spare is handed back to whichever appender next installs
    /// into that slot, closing the allocation-free exchange loop: boxes
    /// cycle consumer→slot→producer indefinitely. Returns `Err(spare)` when
    /// no key is pending.
    ///
    /// Meaningful for evict and merge queues; under an overwrite appender
    /// the parked spare is simply dropped on the next enqueue.
    pub fn poll_exchange(&mut self, spare: Box<V>) -> Result<Box<V>, Box<V>> {
        let Some(token) = self.core.fifo.poll() else {
            return Err(spare);
        };
        match self
            .core
            .index
            .with_token(&token, |slot| slot.take_exchange(spare))
        {
            Ok(value) => {
                self.listener.on_poll(self.core.index.key(&token), &value);
                Ok(value)
            }
            Err(spare) => Err(spare),
        }
    }

    /// Number of distinct keys currently pending. Approximate while
    /// producers are active.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.fifo.len()
    }

    /// True if no key is pending. Approximate while producers are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.fifo.is_empty()
    }

    /// Capacity of the backing fifo.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.fifo.capacity()
    }
}
