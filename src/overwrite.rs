//! Overwrite engine: a later update replaces an earlier unconsumed one.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::error::{EnqueueError, FullSnafu, UnknownKeySnafu};
use crate::index::SlotMap;
use crate::queue::Core;
use crate::slot::Displaced;
use crate::traits::{AppenderListener, Fifo, MultiProducer};

/// Write side of an overwrite queue.
///
/// The cheapest policy: a displaced value is dropped, so producers allocate
/// one box per enqueue. Useful when values are immutable and allocation is
/// acceptable.
pub struct OverwriteAppender<K, V, X, Q, L = ()> {
    core: Arc<Core<K, V, X, Q>>,
    listener: L,
}

impl<K, V, X, Q, L> OverwriteAppender<K, V, X, Q, L>
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

    /// Publish `value` for `key`, dropping any unconsumed predecessor.
    ///
    /// # Errors
    ///
    /// [`EnqueueError::UnknownKey`] hands the update back when `key` is
    /// outside a declared set. [`EnqueueError::Full`] reports an
    /// over-committed fifo: the update is withdrawn from its slot when no
    /// racing producer got there first. Full never occurs while the
    /// documented capacity contract (capacity > distinct keys) holds.
    pub fn enqueue(&mut self, key: &K, value: Box<V>) -> Result<(), EnqueueError<V>> {
        self.listener.on_enqueue(key, &value);
        let (token, (raw, displaced)) = self
            .core
            .index
            .with_slot(key, value, |slot, v| slot.install(v))
            .map_err(|value| UnknownKeySnafu { value }.build())?;
        match displaced {
            Displaced::Live(prev) => {
                self.listener.on_conflation(key, &prev);
                Ok(())
            }
            vacant => {
                let spare = match vacant {
                    Displaced::Parked(spare) => Some(spare),
                    _ => None,
                };
                match self.core.fifo.offer(token) {
                    Ok(()) => Ok(()),
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

impl<K, V, X, Q, L: Clone> Clone for OverwriteAppender<K, V, X, Q, L>
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
