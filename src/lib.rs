//! Keyed conflating queues for multi-producer, single-consumer pipelines.
//!
//! Updates are keyed, and multiple unconsumed updates for the same key
//! collapse into a single pending slot, so a slow consumer always sees the
//! freshest state per key and never a backlog of stale intermediates. The
//! backing fifo carries keys, never values: a key occupies at most one
//! position no matter how many times its slot is rewritten, which is the
//! defining conflation invariant.
//!
//! Three policies decide what happens to a displaced value:
//!
//! - **overwrite** — dropped ([`Builder::overwrite`])
//! - **evict** — returned to the producer for reuse ([`Builder::evict`])
//! - **merge** — folded into the new update via a [`Merger`], and the spent
//!   box returned ([`Builder::merge`])
//!
//! Values move as `Box<V>` and the boxes themselves are the exchange
//! currency: with evict/merge appenders and [`Poller::poll_exchange`],
//! steady-state operation allocates nothing. Appends are a single atomic
//! exchange plus, on first publication, one fifo offer; merge mode is
//! lock-free (CAS retry) but not wait-free.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod builder;
mod error;
mod evict;
mod index;
mod merge;
mod overwrite;
mod queue;
mod ring;
mod slot;
mod traits;

#[cfg(test)]
mod tests;

pub use builder::Builder;
pub use error::EnqueueError;
pub use evict::EvictAppender;
#[cfg(feature = "std")]
pub use index::Open;
pub use index::{Declared, SlotMap};
pub use merge::MergeAppender;
pub use overwrite::OverwriteAppender;
pub use queue::Poller;
pub use ring::{MpscRing, SpscRing};
pub use slot::Slot;
pub use traits::{AppenderListener, Fifo, Merger, MultiProducer, PollerListener};
