//! Evict engine: a displaced value returns to the appender for reuse.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::error::{EnqueueError, FullSnafu, UnknownKeySnafu};
use crate::index::SlotMap;
use crate::queue::Core;
use crate::slot::Displaced;
use crate::traits::{AppenderListener, Fifo, MultiProducer};

/// Write side of an evict queue.
///
/// As overwrite, except the displaced box comes back from `enqueue` so the
/// producer can recycle its storage. Paired with
/// [`Poller::poll_exchange`](crate::Poller::poll_exchange), the steady state
/// allocates nothing: boxes cycle producer→slot→consumer→slot→producer.
pub struct EvictAppender<K, V, X, Q, L = ()> {
    core: Arc<Core<K, V, X, Q>>,
    listener: L,
}

impl<K, V, X, Q, L> EvictAppender<K, V, X, Q, L>
where
    X: SlotMap<K, V>,
    Q: Fifo<X::Token>,
    L: AppenderListener<K, V>,
{
    pub(crate) fn from_parts(core: Arc<Core<K, V, X, Q>>, listener: L) -> Self {
        const {
            assert!(
                align_of::<V>() >= 2,
                "conflation values need align_of::<V>() >= 2 for slot state encoding"
            )
        };
        Self { core, listener }
    }

    /// Publish `value` for `key`.
    ///
    /// Returns the box this install displaced — the evicted predecessor, or
    /// a spare parked by the exchange poller — for reuse. `None` means the
    /// slot held nothing, which stops happening once every key has been
    /// touched and the consumer polls with [`poll_exchange`]. Freshly
    /// evicted values have been superseded and are dead data; spares are
    /// whatever the consumer finished with.
    ///
    /// [`poll_exchange`]: crate::Poller::poll_exchange
    ///
    /// # Errors
    ///
    /// As [`OverwriteAppender::enqueue`](crate::OverwriteAppender::enqueue).
    pub fn enqueue(&mut self, key: &K, value: Box<V>) -> Result<Option<Box<V>>, EnqueueError<V>> {
        self.listener.on_enqueue(key, &value);
        let (token, (raw, displaced)) = self
            .core
            .index
            .with_slot(key, value, |slot, v| slot.install(v))
            .map_err(|value| UnknownKeySnafu { value }.build())?;
        match displaced {
            Displaced::Live(prev) => {
                self.listener.on_conflation(key, &prev);
                Ok(Some(prev))
            }
            vacant => {
                let spare = match vacant {
                    Displaced::Parked(spare) => Some(spare),
                    _ => None,
                };
                match self.core.fifo.offer(token) {
                    Ok(()) => Ok(spare),
                    Err(token) => {
                        let value = self
                            .core
                            .index
                            .with_token(&token, |slot| slot.withdraw(raw, spare));
                        Err(FullSnafu { value }.build())
                    }
                }
            }
        }
    }
}

impl<K, V, X, Q, L: Clone> Clone for EvictAppender<K, V, X, Q, L>
where
    Q: MultiProducer,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            listener: self.listener.clone(),
        }
    }
}
