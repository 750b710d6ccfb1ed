//! Per-key atomic value cell.

use alloc::boxed::Box;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Sentinel target for the claimed state. The forced alignment keeps the
/// parked tag bit clear, and a static address can never collide with a heap
/// allocation or with null.
#[repr(align(64))]
struct ClaimedCell(#[allow(dead_code)] u8);

static CLAIMED: ClaimedCell = ClaimedCell(0);

const PARKED_BIT: usize = 1;

#[inline]
fn is_parked<V>(p: *mut V) -> bool {
    p.addr() & PARKED_BIT != 0
}

#[inline]
fn park<V>(p: *mut V) -> *mut V {
    p.map_addr(|a| a | PARKED_BIT)
}

#[inline]
fn unpark<V>(p: *mut V) -> *mut V {
    p.map_addr(|a| a & !PARKED_BIT)
}

/// Previous occupant displaced by [`Slot::install`].
pub(crate) enum Displaced<V> {
    /// The slot was empty; the caller is the publisher for this key.
    Empty,
    /// A spare parked by the exchange poller. Logically empty: the caller is
    /// the publisher, and the box is recyclable storage.
    Parked(Box<V>),
    /// An unconsumed pending value; the key is already published.
    Live(Box<V>),
}

/// Outcome of a merging install.
pub(crate) enum MergeOutcome<V> {
    /// Installed into an empty or parked slot; the caller must publish the
    /// key. `raw` identifies the installed value for a possible
    /// [`Slot::withdraw`].
    Installed {
        spare: Option<Box<V>>,
        raw: *mut V,
    },
    /// Folded into a live predecessor; the key is already published and the
    /// older box is handed back for reuse.
    Folded { older: Box<V> },
}

/// A per-key cell holding zero or one pending value.
///
/// The single `AtomicPtr` encodes four states: null (empty), a plain pointer
/// (live), a tag-bit pointer (parked spare, logically empty), and a static
/// sentinel (claimed by a merging appender). All transitions are single
/// atomic exchanges or compare-exchanges; no intermediate state is
/// observable other than a transient claim, which readers spin across.
///
/// Exposed so the [`SlotMap`](crate::SlotMap) seam can name it; all
/// operations are crate-internal.
pub struct Slot<V> {
    cell: AtomicPtr<V>,
}

unsafe impl<V: Send> Send for Slot<V> {}
unsafe impl<V: Send> Sync for Slot<V> {}

// Restores a raw value into the cell if dropped, releasing any poller
// spinning on the claim. Defused with `mem::forget` on the normal path.
struct Restore<'a, V> {
    cell: &'a AtomicPtr<V>,
    ptr: *mut V,
}

impl<V> Drop for Restore<'_, V> {
    fn drop(&mut self) {
        self.cell.store(self.ptr, Ordering::Release);
    }
}

impl<V> Slot<V> {
    /// New empty slot.
    pub(crate) const fn empty() -> Self {
        Self {
            cell: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    fn claimed_ptr() -> *mut V {
        (&raw const CLAIMED).cast::<V>().cast_mut()
    }

    /// Atomically install `value`, returning the previous occupant.
    ///
    /// Used by the overwrite and evict engines, which never claim; a blind
    /// exchange is the whole protocol.
    #[inline]
    pub(crate) fn install(&self, value: Box<V>) -> (*mut V, Displaced<V>) {
        let new = Box::into_raw(value);
        let prev = self.cell.swap(new, Ordering::AcqRel);
        debug_assert!(prev != Self::claimed_ptr(), "claim in a non-merging slot");
        let displaced = if prev.is_null() {
            Displaced::Empty
        } else if is_parked(prev) {
            Displaced::Parked(unsafe { Box::from_raw(unpark(prev)) })
        } else {
            Displaced::Live(unsafe { Box::from_raw(prev) })
        };
        (new, displaced)
    }

    /// Install `value`, folding it into a live predecessor with `fold`.
    ///
    /// A live predecessor is first claimed (giving this thread exclusive
    /// ownership), folded via `fold(older, newer)`, and the merged value is
    /// stored back. Rival appenders and the poller spin across the claim,
    /// which is bounded by the fold call. If `fold` panics, the new value is
    /// restored unmerged so spinners are released, and the older value is
    /// dropped during unwind.
    pub(crate) fn merge_install(
        &self,
        value: Box<V>,
        fold: impl FnOnce(&V, &mut V),
    ) -> MergeOutcome<V> {
        let new = Box::into_raw(value);
        let older: Box<V>;
        loop {
            let cur = self.cell.load(Ordering::Acquire);
            if cur == Self::claimed_ptr() {
                core::hint::spin_loop();
                continue;
            }
            if cur.is_null() || is_parked(cur) {
                if self
                    .cell
                    .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let spare =
                        (!cur.is_null()).then(|| unsafe { Box::from_raw(unpark(cur)) });
                    return MergeOutcome::Installed { spare, raw: new };
                }
                continue;
            }
            if self
                .cell
                .compare_exchange_weak(cur, Self::claimed_ptr(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                older = unsafe { Box::from_raw(cur) };
                break;
            }
        }
        let guard = Restore {
            cell: &self.cell,
            ptr: new,
        };
        fold(&older, unsafe { &mut *new });
        core::mem::forget(guard);
        self.cell.store(new, Ordering::Release);
        MergeOutcome::Folded { older }
    }

    /// Atomically remove and return the pending value.
    ///
    /// Called by the poller with a fifo token in hand, so the slot must hold
    /// a live value (or a transient claim, which is spun across). An empty
    /// or parked slot here is an internal invariant breach.
    pub(crate) fn take(&self) -> Option<Box<V>> {
        loop {
            let cur = self.cell.load(Ordering::Acquire);
            if cur == Self::claimed_ptr() {
                core::hint::spin_loop();
                continue;
            }
            if cur.is_null() || is_parked(cur) {
                debug_assert!(false, "fifo token for an empty slot");
                return None;
            }
            if self
                .cell
                .compare_exchange_weak(cur, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(unsafe { Box::from_raw(cur) });
            }
        }
    }

    /// Remove and return the pending value, parking `spare` in its place.
    ///
    /// The parked spare is handed to the next appender that installs into
    /// this slot, which keeps the producer side allocation-free while the
    /// consumer drains. Returns `Err(spare)` if the slot was unexpectedly
    /// empty.
    pub(crate) fn take_exchange(&self, spare: Box<V>) -> Result<Box<V>, Box<V>> {
        const {
            assert!(
                align_of::<V>() >= 2,
                "exchange polling needs align_of::<V>() >= 2 for the parked tag bit"
            )
        };
        let spare_raw = Box::into_raw(spare);
        loop {
            let cur = self.cell.load(Ordering::Acquire);
            if cur == Self::claimed_ptr() {
                core::hint::spin_loop();
                continue;
            }
            if cur.is_null() || is_parked(cur) {
                debug_assert!(false, "fifo token for an empty slot");
                return Err(unsafe { Box::from_raw(spare_raw) });
            }
            if self
                .cell
                .compare_exchange_weak(cur, park(spare_raw), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(unsafe { Box::from_raw(cur) });
            }
        }
    }

    /// Withdraw a value this thread just installed, after its publication
    /// was rejected by the fifo.
    ///
    /// Restores the pre-install state: `spare` (the parked box the install
    /// displaced, if any) is parked again, otherwise the slot is emptied.
    /// Returns recyclable storage for the caller — the withdrawn update
    /// itself, or, if a racing producer already displaced it, the spare.
    pub(crate) fn withdraw(&self, installed: *mut V, spare: Option<Box<V>>) -> Option<Box<V>> {
        let (replacement, spare_raw) = match spare {
            Some(b) => {
                let raw = Box::into_raw(b);
                (park(raw), Some(raw))
            }
            None => (ptr::null_mut(), None),
        };
        match self
            .cell
            .compare_exchange(installed, replacement, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(unsafe { Box::from_raw(installed) }),
            Err(_) => spare_raw.map(|raw| unsafe { Box::from_raw(raw) }),
        }
    }
}

impl<V> Drop for Slot<V> {
    fn drop(&mut self) {
        let cur = *self.cell.get_mut();
        debug_assert!(cur != Self::claimed_ptr(), "slot dropped mid-merge");
        if !cur.is_null() && cur != Self::claimed_ptr() {
            drop(unsafe { Box::from_raw(unpark(cur)) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_reports_prior_state() {
        let slot = Slot::empty();
        let (_, prev) = slot.install(Box::new(1u64));
        assert!(matches!(prev, Displaced::Empty));
        let (_, prev) = slot.install(Box::new(2u64));
        match prev {
            Displaced::Live(v) => assert_eq!(*v, 1),
            _ => panic!("expected a live predecessor"),
        }
        assert_eq!(slot.take().map(|v| *v), Some(2));
    }

    #[test]
    fn take_exchange_parks_the_spare() {
        let slot = Slot::empty();
        slot.install(Box::new(7u64));
        let taken = slot.take_exchange(Box::new(99u64)).unwrap();
        assert_eq!(*taken, 7);

        // The parked spare comes back to the next installer.
        let (_, prev) = slot.install(Box::new(8u64));
        match prev {
            Displaced::Parked(spare) => assert_eq!(*spare, 99),
            _ => panic!("expected the parked spare"),
        }
    }

    #[test]
    fn merge_install_folds_live_values() {
        let slot = Slot::empty();
        let out = slot.merge_install(Box::new(10u64), |_, _| panic!("nothing to fold"));
        assert!(matches!(out, MergeOutcome::Installed { spare: None, .. }));

        let out = slot.merge_install(Box::new(5u64), |older, newer| *newer += *older);
        match out {
            MergeOutcome::Folded { older } => assert_eq!(*older, 10),
            _ => panic!("expected a fold"),
        }
        assert_eq!(slot.take().map(|v| *v), Some(15));
    }

    #[test]
    fn merge_install_recycles_a_parked_spare_without_folding() {
        let slot = Slot::empty();
        slot.install(Box::new(1u64));
        slot.take_exchange(Box::new(42u64)).unwrap();

        let out = slot.merge_install(Box::new(2u64), |_, _| panic!("spares are not folded"));
        match out {
            MergeOutcome::Installed { spare: Some(s), .. } => assert_eq!(*s, 42),
            _ => panic!("expected the spare back"),
        }
    }

    #[test]
    fn withdraw_restores_the_previous_state() {
        let slot = Slot::empty();
        let (raw, _) = slot.install(Box::new(3u64));
        let back = slot.withdraw(raw, None);
        assert_eq!(back.map(|v| *v), Some(3));

        // Withdrawing after a racing install hands nothing back.
        let (raw, _) = slot.install(Box::new(4u64));
        let (_, prev) = slot.install(Box::new(5u64));
        assert!(matches!(prev, Displaced::Live(_)));
        assert!(slot.withdraw(raw, None).is_none());
        assert_eq!(slot.take().map(|v| *v), Some(5));
    }

    #[test]
    fn drop_reclaims_live_and_parked_boxes() {
        let slot = Slot::empty();
        slot.install(Box::new(alloc::string::String::from("pending")));
        drop(slot);

        let slot = Slot::empty();
        slot.install(Box::new(alloc::string::String::from("taken")));
        slot.take_exchange(Box::new(alloc::string::String::from("spare")))
            .unwrap();
        drop(slot);
    }
}
