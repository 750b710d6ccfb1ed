//! Seams: the backing fifo contract, the merge function, and the
//! instrumentation hooks.

/// Bounded fifo of conflation tokens backing a queue.
///
/// The queue relies on this only for key transport; values never enter the
/// fifo. `offer` must be linearizable with respect to `poll`, and `poll` may
/// only ever be called from one thread at a time (the consumer).
pub trait Fifo<T> {
    /// Append an item at the tail.
    ///
    /// Returns the item back when the fifo is full.
    fn offer(&self, item: T) -> Result<(), T>;

    /// Remove the item at the head, if any. Single consumer only.
    fn poll(&self) -> Option<T>;

    /// Number of items currently queued. Approximate under concurrency.
    fn len(&self) -> usize;

    /// True if no items are queued. Approximate under concurrency.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity.
    fn capacity(&self) -> usize;
}

/// Marker for fifos whose `offer` may be called from multiple threads
/// concurrently.
///
/// An appender handle is only cloneable when its backing fifo carries this
/// marker, so single-producer rings cannot be shared by accident.
///
/// # Safety
///
/// Implementors must guarantee that concurrent `offer` calls (racing each
/// other and a single `poll`er) are linearizable and lose no items.
pub unsafe trait MultiProducer {}

/// Combines an older pending value with a newer one.
///
/// `merge` folds `older` into `newer` in place; after the call `newer` holds
/// the combined update. The older/newer argument order is contractual. The
/// function runs on the appender thread, must not block, and is invoked at
/// most once per enqueue.
pub trait Merger<K, V> {
    /// Fold `older` into `newer`.
    fn merge(&self, key: &K, older: &V, newer: &mut V);
}

impl<K, V, F> Merger<K, V> for F
where
    F: Fn(&K, &V, &mut V),
{
    #[inline]
    fn merge(&self, key: &K, older: &V, newer: &mut V) {
        self(key, older, newer);
    }
}

/// Observation hooks on the write side.
///
/// Hooks are called synchronously on the appender thread and must not mutate
/// the queue. A panicking hook propagates, but every slot/fifo transition is
/// either complete or not yet begun at each hook site, so queue state stays
/// consistent. Each appender handle owns its own listener instance; cloning
/// an appender clones the listener.
pub trait AppenderListener<K, V> {
    /// An update is about to be installed in `key`'s slot.
    fn on_enqueue(&mut self, key: &K, value: &V) {
        let _ = (key, value);
    }

    /// An earlier unconsumed value for `key` was displaced by the install.
    fn on_conflation(&mut self, key: &K, displaced: &V) {
        let _ = (key, displaced);
    }
}

/// No-op appender listener.
impl<K, V> AppenderListener<K, V> for () {}

/// Observation hook on the read side, called synchronously on the consumer
/// thread after the value has been taken from its slot.
pub trait PollerListener<K, V> {
    /// A value was polled for `key`.
    fn on_poll(&mut self, key: &K, value: &V) {
        let _ = (key, value);
    }
}

/// No-op poller listener.
impl<K, V> PollerListener<K, V> for () {}
