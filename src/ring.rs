//! Bounded lock-free rings carrying conflation tokens.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::traits::{Fifo, MultiProducer};

/// Atomic cursor with named, ordering-explicit operations.
#[repr(transparent)]
struct Cursor(AtomicUsize);

impl Cursor {
    #[inline]
    const fn new(val: usize) -> Self {
        Self(AtomicUsize::new(val))
    }

    /// Load with Acquire ordering.
    #[inline]
    fn load(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Load with Relaxed ordering (for reading own cursor).
    #[inline]
    fn load_relaxed(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Store with Release ordering.
    #[inline]
    fn store(&self, val: usize) {
        self.0.store(val, Ordering::Release);
    }

    /// Store with Relaxed ordering (for a cursor only its owner reads).
    #[inline]
    fn store_relaxed(&self, val: usize) {
        self.0.store(val, Ordering::Relaxed);
    }

    /// Claim `cur` by advancing to `next`. Returns the observed value on
    /// failure.
    #[inline]
    fn claim(&self, cur: usize, next: usize) -> Result<usize, usize> {
        self.0
            .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
    }

    /// Load without atomics (exclusive access).
    #[inline]
    fn load_mut(&mut self) -> usize {
        *self.0.get_mut()
    }
}

/// Target cache-line size in bytes. 64 bytes is correct for x86-64 and most
/// ARM64 server cores.
const CACHE_LINE: usize = 64;

const HEAD_PAD: usize = CACHE_LINE - size_of::<Cursor>();
const TAIL_PAD: usize = CACHE_LINE - size_of::<Cursor>();
const SPSC_HEAD_PAD: usize = CACHE_LINE - size_of::<Cursor>() - size_of::<Cell<usize>>();
const SPSC_TAIL_PAD: usize = CACHE_LINE - size_of::<Cursor>() - size_of::<Cell<usize>>();

/// Maximum supported capacity (2^20 slots). Prevents accidental huge
/// allocations from a mistyped capacity.
const MAX_CAPACITY: usize = 1 << 20;

fn rounded_capacity(capacity: usize) -> usize {
    assert!(capacity > 0, "capacity must be > 0");
    let capacity = capacity.next_power_of_two();
    assert!(capacity <= MAX_CAPACITY, "capacity exceeds maximum (2^20)");
    capacity
}

// ── MPSC ─────────────────────────────────────────────────────────────

/// One ring seat: a sequence number plus the item storage.
///
/// The sequence encodes the seat's lap state: `pos` means free for the
/// producer claiming position `pos`, `pos + 1` means occupied and readable,
/// `pos + capacity` means free for the next lap.
struct Seat<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Seat<T> {
    fn new(sequence: usize) -> Self {
        Self {
            sequence: AtomicUsize::new(sequence),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Bounded lock-free multi-producer, single-consumer ring.
///
/// Producers claim a tail position with a compare-exchange and publish their
/// write through the seat's sequence number; the consumer follows head
/// without ever contending with producers. Capacity is rounded up to a power
/// of two.
///
/// Fields are laid out with explicit cache-line padding so the consumer's
/// head and the producers' tail never share a line.
#[repr(C)]
pub struct MpscRing<T> {
    // ── Consumer cache line ──────────────────────────────────────────
    head: Cursor,
    _pad_head: [u8; HEAD_PAD],

    // ── Producer cache line ──────────────────────────────────────────
    tail: Cursor,
    _pad_tail: [u8; TAIL_PAD],

    // ── Cold fields ──────────────────────────────────────────────────
    buffer: Box<[Seat<T>]>,
    mask: usize,
}

unsafe impl<T: Send> Send for MpscRing<T> {}
unsafe impl<T: Send> Sync for MpscRing<T> {}

unsafe impl<T> MultiProducer for MpscRing<T> {}

impl<T> MpscRing<T> {
    /// Create a ring with at least `capacity` seats (rounded up to a power
    /// of two).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or the rounded capacity exceeds 2^20.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = rounded_capacity(capacity);
        let buffer: Box<[Seat<T>]> = (0..capacity).map(Seat::new).collect::<Vec<_>>().into();
        Self {
            head: Cursor::new(0),
            _pad_head: [0; HEAD_PAD],
            tail: Cursor::new(0),
            _pad_tail: [0; TAIL_PAD],
            buffer,
            mask: capacity - 1,
        }
    }
}

impl<T> Fifo<T> for MpscRing<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        let mut tail = self.tail.load_relaxed();
        loop {
            let seat = &self.buffer[tail & self.mask];
            let seq = seat.sequence.load(Ordering::Acquire);
            let lag = (seq as isize).wrapping_sub(tail as isize);
            if lag == 0 {
                match self.tail.claim(tail, tail.wrapping_add(1)) {
                    Ok(_) => {
                        unsafe { (*seat.value.get()).write(item) };
                        seat.sequence.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(observed) => tail = observed,
                }
            } else if lag < 0 {
                // Seat still holds last lap's item: the ring is full.
                return Err(item);
            } else {
                tail = self.tail.load_relaxed();
            }
        }
    }

    fn poll(&self) -> Option<T> {
        // Only the consumer writes head, so a relaxed self-read suffices.
        let head = self.head.load_relaxed();
        let seat = &self.buffer[head & self.mask];
        let seq = seat.sequence.load(Ordering::Acquire);
        if (seq as isize).wrapping_sub(head.wrapping_add(1) as isize) < 0 {
            return None;
        }
        let item = unsafe { (*seat.value.get()).assume_init_read() };
        // Free the seat for the producer one lap ahead.
        seat.sequence
            .store(head.wrapping_add(self.mask).wrapping_add(1), Ordering::Release);
        self.head.store_relaxed(head.wrapping_add(1));
        Some(item)
    }

    fn len(&self) -> usize {
        let len = self
            .tail
            .load_relaxed()
            .wrapping_sub(self.head.load_relaxed());
        // Clamp: racing reads can observe momentarily inconsistent cursors.
        if len > self.mask + 1 { self.mask + 1 } else { len }
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for MpscRing<T> {
    fn drop(&mut self) {
        let mut head = self.head.load_mut();
        let tail = self.tail.load_mut();
        let mask = self.mask;
        while head != tail {
            let seat = &mut self.buffer[head & mask];
            if *seat.sequence.get_mut() == head.wrapping_add(1) {
                unsafe { seat.value.get_mut().assume_init_drop() };
            }
            head = head.wrapping_add(1);
        }
    }
}

// ── SPSC ─────────────────────────────────────────────────────────────

/// Bounded single-producer, single-consumer ring.
///
/// A Lamport queue with producer- and consumer-local cached cursors, so the
/// common path reads no cross-core state. Cheaper than [`MpscRing`] when
/// exactly one thread appends; the appender handle built over it is not
/// cloneable, which enforces that statically.
#[repr(C)]
pub struct SpscRing<T> {
    // ── Consumer cache line ──────────────────────────────────────────
    head: Cursor,
    /// Consumer-local cache of tail. Avoids cross-core reads on every poll
    /// when the ring is known non-empty.
    cached_tail: Cell<usize>,
    _pad_head: [u8; SPSC_HEAD_PAD],

    // ── Producer cache line ──────────────────────────────────────────
    tail: Cursor,
    /// Producer-local cache of head. Avoids cross-core reads on every offer
    /// when the ring is not full.
    cached_head: Cell<usize>,
    _pad_tail: [u8; SPSC_TAIL_PAD],

    // ── Cold fields ──────────────────────────────────────────────────
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Create a ring with at least `capacity` slots (rounded up to a power
    /// of two).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or the rounded capacity exceeds 2^20.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = rounded_capacity(capacity);
        let buffer: Box<[UnsafeCell<MaybeUninit<T>>]> = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into();
        Self {
            head: Cursor::new(0),
            cached_tail: Cell::new(0),
            _pad_head: [0; SPSC_HEAD_PAD],
            tail: Cursor::new(0),
            cached_head: Cell::new(0),
            _pad_tail: [0; SPSC_TAIL_PAD],
            buffer,
            mask: capacity - 1,
        }
    }
}

impl<T> Fifo<T> for SpscRing<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load_relaxed();
        let mut head = self.cached_head.get();
        if tail.wrapping_sub(head) > self.mask {
            head = self.head.load();
            self.cached_head.set(head);
            if tail.wrapping_sub(head) > self.mask {
                return Err(item);
            }
        }
        unsafe { (*self.buffer[tail & self.mask].get()).write(item) };
        self.tail.store(tail.wrapping_add(1));
        Ok(())
    }

    fn poll(&self) -> Option<T> {
        let head = self.head.load_relaxed();
        let mut tail = self.cached_tail.get();
        if head == tail {
            tail = self.tail.load();
            self.cached_tail.set(tail);
            if head == tail {
                return None;
            }
        }
        let item = unsafe { (*self.buffer[head & self.mask].get()).assume_init_read() };
        self.head.store(head.wrapping_add(1));
        Some(item)
    }

    fn len(&self) -> usize {
        let len = self
            .tail
            .load_relaxed()
            .wrapping_sub(self.head.load_relaxed());
        if len > self.mask + 1 { self.mask + 1 } else { len }
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        let mut head = self.head.load_mut();
        let tail = self.tail.load_mut();
        while head != tail {
            unsafe { self.buffer[head & self.mask].get_mut().assume_init_drop() };
            head = head.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use core::mem;

    type Mpsc = MpscRing<u64>;
    type Spsc = SpscRing<u64>;

    #[test]
    fn mpsc_cache_line_layout() {
        let head_offset = mem::offset_of!(Mpsc, head);
        let tail_offset = mem::offset_of!(Mpsc, tail);
        let buffer_offset = mem::offset_of!(Mpsc, buffer);

        assert_eq!(head_offset, 0, "head should be at offset 0");
        assert_eq!(
            tail_offset, CACHE_LINE,
            "tail should be at start of second cache line"
        );
        assert_eq!(
            buffer_offset,
            2 * CACHE_LINE,
            "buffer should start at third cache line"
        );

        // head and tail on different cache lines
        assert_ne!(
            head_offset / CACHE_LINE,
            tail_offset / CACHE_LINE,
            "head and tail must be on different cache lines"
        );
    }

    #[test]
    fn spsc_cache_line_layout() {
        let head_offset = mem::offset_of!(Spsc, head);
        let cached_tail_offset = mem::offset_of!(Spsc, cached_tail);
        let tail_offset = mem::offset_of!(Spsc, tail);
        let cached_head_offset = mem::offset_of!(Spsc, cached_head);
        let buffer_offset = mem::offset_of!(Spsc, buffer);

        // Consumer cache line: head, cached_tail, padding
        assert_eq!(head_offset, 0, "head should be at offset 0");
        assert_eq!(
            cached_tail_offset,
            size_of::<Cursor>(),
            "cached_tail should follow head"
        );

        // Producer cache line: tail, cached_head, padding
        assert_eq!(
            tail_offset, CACHE_LINE,
            "tail should be at start of second cache line"
        );
        assert_eq!(
            cached_head_offset,
            CACHE_LINE + size_of::<Cursor>(),
            "cached_head should follow tail"
        );

        // Cold fields
        assert_eq!(
            buffer_offset,
            2 * CACHE_LINE,
            "buffer should start at third cache line"
        );

        // head and tail on different cache lines
        assert_ne!(
            head_offset / CACHE_LINE,
            tail_offset / CACHE_LINE,
            "head and tail must be on different cache lines"
        );

        // cached values co-located with their owner's cursor
        assert_eq!(
            cached_tail_offset / CACHE_LINE,
            head_offset / CACHE_LINE,
            "cached_tail must share cache line with head"
        );
        assert_eq!(
            cached_head_offset / CACHE_LINE,
            tail_offset / CACHE_LINE,
            "cached_head must share cache line with tail"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpsc_rejects_when_full_and_keeps_fifo_order() {
        let ring = MpscRing::new(4);
        assert_eq!(ring.capacity(), 4);
        for i in 0..4usize {
            assert!(ring.offer(i).is_ok());
        }
        assert_eq!(ring.offer(99), Err(99));
        for i in 0..4usize {
            assert_eq!(ring.poll(), Some(i));
        }
        assert_eq!(ring.poll(), None);
    }

    #[test]
    fn mpsc_survives_many_laps() {
        let ring = MpscRing::new(4);
        for round in 0..100usize {
            for i in 0..3 {
                assert!(ring.offer(round * 3 + i).is_ok());
            }
            for i in 0..3 {
                assert_eq!(ring.poll(), Some(round * 3 + i));
            }
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn capacity_rounds_up_to_a_power_of_two() {
        assert_eq!(MpscRing::<usize>::new(3).capacity(), 4);
        assert_eq!(MpscRing::<usize>::new(1000).capacity(), 1024);
        assert_eq!(SpscRing::<usize>::new(5).capacity(), 8);
    }

    #[test]
    fn spsc_full_and_wraparound() {
        let ring = SpscRing::new(2);
        assert!(ring.offer(1).is_ok());
        assert!(ring.offer(2).is_ok());
        assert_eq!(ring.offer(3), Err(3));
        assert_eq!(ring.poll(), Some(1));
        assert!(ring.offer(3).is_ok());
        assert_eq!(ring.poll(), Some(2));
        assert_eq!(ring.poll(), Some(3));
        assert_eq!(ring.poll(), None);
    }

    #[test]
    fn drop_releases_undelivered_items() {
        let ring = MpscRing::new(8);
        ring.offer(alloc::string::String::from("left behind")).unwrap();
        ring.offer(alloc::string::String::from("also left")).unwrap();
        drop(ring);

        let ring = SpscRing::new(8);
        ring.offer(alloc::vec![1u8, 2, 3]).unwrap();
        drop(ring);
    }

    #[cfg(feature = "std")]
    #[test]
    fn mpsc_concurrent_offers_lose_nothing() {
        use std::sync::Arc;

        let ring = Arc::new(MpscRing::new(1024));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || {
                    for i in 0..200usize {
                        let mut item = p * 1000 + i;
                        loop {
                            match ring.offer(item) {
                                Ok(()) => break,
                                Err(back) => {
                                    item = back;
                                    std::thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let mut seen = alloc::vec![0usize; 4];
        let mut total = 0;
        while total < 800 {
            if let Some(item) = ring.poll() {
                let producer = item / 1000;
                // Per-producer order is FIFO.
                assert_eq!(item % 1000, seen[producer]);
                seen[producer] += 1;
                total += 1;
            } else {
                std::thread::yield_now();
            }
        }
        for handle in producers {
            handle.join().unwrap();
        }
        assert_eq!(seen, alloc::vec![200; 4]);
    }
}
