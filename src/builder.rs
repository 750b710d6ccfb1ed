//! Queue construction.

use alloc::sync::Arc;
use core::hash::Hash;
use core::marker::PhantomData;

use crate::evict::EvictAppender;
use crate::index::Declared;
#[cfg(feature = "std")]
use crate::index::Open;
use crate::merge::MergeAppender;
use crate::overwrite::OverwriteAppender;
use crate::queue::{Core, Poller};
use crate::ring::MpscRing;
use crate::traits::{AppenderListener, Fifo, Merger, PollerListener};

/// Builds a conflation queue, returning its `(appender, poller)` handle
/// pair.
///
/// ```
/// use conflux::Builder;
///
/// let (mut appender, mut poller) = Builder::new().overwrite(["eurusd", "gbpusd"]);
/// appender.enqueue(&"eurusd", Box::new(1.0860_f64)).unwrap();
/// appender.enqueue(&"eurusd", Box::new(1.0861_f64)).unwrap();
/// assert_eq!(poller.poll(), Some(Box::new(1.0861)));
/// assert_eq!(poller.poll(), None);
/// ```
///
/// Declared terminals register a fixed key set up front: lookups are
/// allocation-free and unregistered keys are rejected. Open terminals
/// (`std`) accept any key, creating its slot on first enqueue. The fifo
/// capacity defaults to one past the number of declared keys and is always
/// rounded up to a power of two; open queues must set it explicitly.
pub struct Builder<K, V, AL = (), PL = ()> {
    capacity: Option<usize>,
    appender_listener: AL,
    poller_listener: PL,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> Builder<K, V> {
    /// New builder with no-op listeners and a derived capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: None,
            appender_listener: (),
            poller_listener: (),
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for Builder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, AL, PL> Builder<K, V, AL, PL> {
    /// Set the backing fifo capacity (rounded up to a power of two).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        self.capacity = Some(capacity);
        self
    }

    /// Attach an appender listener prototype. Every appender handle
    /// (including clones) carries its own instance.
    #[must_use]
    pub fn appender_listener<L>(self, listener: L) -> Builder<K, V, L, PL> {
        Builder {
            capacity: self.capacity,
            appender_listener: listener,
            poller_listener: self.poller_listener,
            _marker: PhantomData,
        }
    }

    /// Attach the poller listener.
    #[must_use]
    pub fn poller_listener<L>(self, listener: L) -> Builder<K, V, AL, L> {
        Builder {
            capacity: self.capacity,
            appender_listener: self.appender_listener,
            poller_listener: listener,
            _marker: PhantomData,
        }
    }

    fn declared_fifo(&self, keys: usize) -> MpscRing<usize> {
        let capacity = self.capacity.unwrap_or(keys + 1);
        assert!(
            capacity > keys,
            "fifo capacity must exceed the number of declared keys"
        );
        MpscRing::new(capacity)
    }

    #[cfg(feature = "std")]
    fn open_fifo<T>(&self) -> MpscRing<T> {
        let Some(capacity) = self.capacity else {
            panic!("open-keyed queues need an explicit capacity")
        };
        MpscRing::new(capacity)
    }
}

impl<K, V, AL, PL> Builder<K, V, AL, PL>
where
    K: Eq + Hash + Clone,
    AL: AppenderListener<K, V>,
    PL: PollerListener<K, V>,
{
    /// Overwrite queue over a declared key set.
    pub fn overwrite(
        self,
        keys: impl IntoIterator<Item = K>,
    ) -> (
        OverwriteAppender<K, V, Declared<K, V>, MpscRing<usize>, AL>,
        Poller<K, V, Declared<K, V>, MpscRing<usize>, PL>,
    ) {
        let index = Declared::new(keys);
        let fifo = self.declared_fifo(index.len());
        self.overwrite_with_fifo(index, fifo)
    }

    /// Evict queue over a declared key set.
    pub fn evict(
        self,
        keys: impl IntoIterator<Item = K>,
    ) -> (
        EvictAppender<K, V, Declared<K, V>, MpscRing<usize>, AL>,
        Poller<K, V, Declared<K, V>, MpscRing<usize>, PL>,
    ) {
        let index = Declared::new(keys);
        let fifo = self.declared_fifo(index.len());
        self.evict_with_fifo(index, fifo)
    }

    /// Merge queue over a declared key set.
    pub fn merge<M: Merger<K, V>>(
        self,
        keys: impl IntoIterator<Item = K>,
        merger: M,
    ) -> (
        MergeAppender<K, V, Declared<K, V>, MpscRing<usize>, M, AL>,
        Poller<K, V, Declared<K, V>, MpscRing<usize>, PL>,
    ) {
        let index = Declared::new(keys);
        let fifo = self.declared_fifo(index.len());
        self.merge_with_fifo(index, fifo, merger)
    }

    /// Overwrite queue over a declared key set and a caller-supplied fifo,
    /// e.g. an [`SpscRing`](crate::SpscRing) when there is exactly one
    /// producer. The appender is only cloneable for
    /// [`MultiProducer`](crate::MultiProducer) fifos.
    ///
    /// # Panics
    ///
    /// Panics if the fifo cannot hold every declared key plus one.
    pub fn overwrite_with_fifo<Q: Fifo<usize>>(
        self,
        index: Declared<K, V>,
        fifo: Q,
    ) -> (
        OverwriteAppender<K, V, Declared<K, V>, Q, AL>,
        Poller<K, V, Declared<K, V>, Q, PL>,
    ) {
        assert_fifo_fits(index.len(), fifo.capacity());
        let core = Arc::new(Core::new(index, fifo));
        (
            OverwriteAppender::from_parts(Arc::clone(&core), self.appender_listener),
            Poller::from_parts(core, self.poller_listener),
        )
    }

    /// Evict queue over a declared key set and a caller-supplied fifo.
    ///
    /// # Panics
    ///
    /// Panics if the fifo cannot hold every declared key plus one.
    pub fn evict_with_fifo<Q: Fifo<usize>>(
        self,
        index: Declared<K, V>,
        fifo: Q,
    ) -> (
        EvictAppender<K, V, Declared<K, V>, Q, AL>,
        Poller<K, V, Declared<K, V>, Q, PL>,
    ) {
        assert_fifo_fits(index.len(), fifo.capacity());
        let core = Arc::new(Core::new(index, fifo));
        (
            EvictAppender::from_parts(Arc::clone(&core), self.appender_listener),
            Poller::from_parts(core, self.poller_listener),
        )
    }

    /// Merge queue over a declared key set and a caller-supplied fifo.
    ///
    /// # Panics
    ///
    /// Panics if the fifo cannot hold every declared key plus one.
    pub fn merge_with_fifo<Q: Fifo<usize>, M: Merger<K, V>>(
        self,
        index: Declared<K, V>,
        fifo: Q,
        merger: M,
    ) -> (
        MergeAppender<K, V, Declared<K, V>, Q, M, AL>,
        Poller<K, V, Declared<K, V>, Q, PL>,
    ) {
        assert_fifo_fits(index.len(), fifo.capacity());
        let core = Arc::new(Core::new(index, fifo));
        (
            MergeAppender::from_parts(Arc::clone(&core), merger, self.appender_listener),
            Poller::from_parts(core, self.poller_listener),
        )
    }
}

#[cfg(feature = "std")]
impl<K, V, AL, PL> Builder<K, V, AL, PL>
where
    K: Eq + Hash + Clone + Send,
    AL: AppenderListener<K, V>,
    PL: PollerListener<K, V>,
{
    /// Overwrite queue over an open key set; slots are created on first
    /// enqueue.
    ///
    /// # Panics
    ///
    /// Panics if no capacity was set.
    pub fn overwrite_open(
        self,
    ) -> (
        OverwriteAppender<K, V, Open<K, V>, MpscRing<K>, AL>,
        Poller<K, V, Open<K, V>, MpscRing<K>, PL>,
    ) {
        let fifo = self.open_fifo();
        let core = Arc::new(Core::new(Open::new(), fifo));
        (
            OverwriteAppender::from_parts(Arc::clone(&core), self.appender_listener),
            Poller::from_parts(core, self.poller_listener),
        )
    }

    /// Evict queue over an open key set.
    ///
    /// # Panics
    ///
    /// Panics if no capacity was set.
    pub fn evict_open(
        self,
    ) -> (
        EvictAppender<K, V, Open<K, V>, MpscRing<K>, AL>,
        Poller<K, V, Open<K, V>, MpscRing<K>, PL>,
    ) {
        let fifo = self.open_fifo();
        let core = Arc::new(Core::new(Open::new(), fifo));
        (
            EvictAppender::from_parts(Arc::clone(&core), self.appender_listener),
            Poller::from_parts(core, self.poller_listener),
        )
    }

    /// Merge queue over an open key set.
    ///
    /// # Panics
    ///
    /// Panics if no capacity was set.
    pub fn merge_open<M: Merger<K, V>>(
        self,
        merger: M,
    ) -> (
        MergeAppender<K, V, Open<K, V>, MpscRing<K>, M, AL>,
        Poller<K, V, Open<K, V>, MpscRing<K>, PL>,
    ) {
        let fifo = self.open_fifo();
        let core = Arc::new(Core::new(Open::new(), fifo));
        (
            MergeAppender::from_parts(Arc::clone(&core), merger, self.appender_listener),
            Poller::from_parts(core, self.poller_listener),
        )
    }
}

fn assert_fifo_fits(keys: usize, capacity: usize) {
    assert!(
        capacity > keys,
        "fifo capacity must exceed the number of declared keys"
    );
}
