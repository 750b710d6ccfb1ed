//! Merge engine: a live predecessor is folded into the new update.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::error::{EnqueueError, FullSnafu, UnknownKeySnafu};
use crate::index::SlotMap;
use crate::queue::Core;
use crate::slot::MergeOutcome;
use crate::traits::{AppenderListener, Fifo, Merger, MultiProducer};

/// Write side of a merge queue.
///
/// A pending predecessor is not discarded: it is claimed, folded into the
/// new update via the [`Merger`], and its box returned for reuse. Every
/// enqueued value therefore contributes to exactly one polled value. The
/// merger runs on the appender thread; each appender handle owns its own
/// merger instance (clones share nothing).
pub struct MergeAppender<K, V, X, Q, M, L = ()> {
    core: Arc<Core<K, V, X, Q>>,
    merger: M,
    listener: L,
}

impl<K, V, X, Q, M, L> MergeAppender<K, V, X, Q, M, L>
where
    X: SlotMap<K, V>,
    Q: Fifo<X::Token>,
    M: Merger<K, V>,
    L: AppenderListener<K, V>,
{
    pub(crate) fn from_parts(core: Arc<Core<K, V, X, Q>>, merger: M, listener: L) -> Self {
        const {
            assert!(
                align_of::<V>() >= 2,
                "conflation values need align_of::<V>() >= 2 for slot state encoding"
            )
        };
        Self {
            core,
            merger,
            listener,
        }
    }

    /// Publish `value` for `key`, folding in any unconsumed predecessor.
    ///
    /// The merger sees `(older, newer)` in that contractual order and leaves
    /// the combined update in place; the older box is returned for reuse.
    /// A panicking merger leaves the new value in the slot unmerged and
    /// drops the predecessor during unwind.
    ///
    /// # Errors
    ///
    /// As [`OverwriteAppender::enqueue`](crate::OverwriteAppender::enqueue).
    pub fn enqueue(&mut self, key: &K, value: Box<V>) -> Result<Option<Box<V>>, EnqueueError<V>> {
        self.listener.on_enqueue(key, &value);
        let merger = &self.merger;
        let (token, outcome) = self
            .core
            .index
            .with_slot(key, value, |slot, v| {
                slot.merge_install(v, |older, newer| merger.merge(key, older, newer))
            })
            .map_err(|value| UnknownKeySnafu { value }.build())?;
        match outcome {
            MergeOutcome::Folded { older } => {
                self.listener.on_conflation(key, &older);
                Ok(Some(older))
            }
            MergeOutcome::Installed { spare, raw } => match self.core.fifo.offer(token) {
                Ok(()) => Ok(spare),
                Err(token) => {
                    let value = self
                        .core
                        .index
                        .with_token(&token, |slot| slot.withdraw(raw, spare));
                    Err(FullSnafu { value }.build())
                }
            },
        }
    }
}

impl<K, V, X, Q, M: Clone, L: Clone> Clone for MergeAppender<K, V, X, Q, M, L>
where
    Q: MultiProducer,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            merger: self.merger.clone(),
            listener: self.listener.clone(),
        }
    }
}
