//! Error types.

use alloc::boxed::Box;
use core::fmt;

use snafu::Snafu;

/// Why an enqueue was rejected.
///
/// Both variants hand recyclable storage back where possible; `Debug` is
/// implemented by hand so `V` carries no bounds.
#[derive(Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EnqueueError<V> {
    /// The key is outside the declared set (strict declared queues only).
    /// The update is handed back untouched.
    #[snafu(display("key is not declared for this queue"))]
    UnknownKey {
        /// The rejected update, unchanged.
        value: Box<V>,
    },

    /// The backing fifo rejected the key: more distinct keys are in flight
    /// than the fifo can hold. This is a capacity misconfiguration signal,
    /// not backpressure; size the fifo past the number of distinct keys.
    /// The update is withdrawn from its slot and returned whenever no racing
    /// producer displaced it first.
    #[snafu(display(
        "backing fifo is full; capacity must exceed the number of distinct keys in flight"
    ))]
    Full {
        /// Recyclable storage: the withdrawn update, or the displaced spare
        /// when the update itself could not be recovered.
        value: Option<Box<V>>,
    },
}

impl<V> EnqueueError<V> {
    /// Consume the error, recovering whatever storage it carries.
    pub fn into_value(self) -> Option<Box<V>> {
        match self {
            Self::UnknownKey { value } => Some(value),
            Self::Full { value } => value,
        }
    }
}

impl<V> fmt::Debug for EnqueueError<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey { .. } => f.write_str("UnknownKey"),
            Self::Full { value } => f
                .debug_struct("Full")
                .field("recovered", &value.is_some())
                .finish(),
        }
    }
}
