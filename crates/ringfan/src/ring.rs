//! Lock-free SPSC ring of 64-bit payload words.
//!
//! # Synchronization protocol
//!
//! `head` is written only by the ring's producer, `tail` only by its
//! consumer. Both are unbounded u64 sequence numbers; a slot index is
//! `seq & (capacity - 1)`, and occupancy is `head - tail` in wrapping
//! arithmetic, so wraparound is well-defined and full/empty never alias.
//!
//! **Producer (enqueue):**
//! 1. Load `head` Relaxed (own cursor), check space against a locally cached
//!    shadow of `tail`.
//! 2. If the ring looks full, refresh the shadow with an Acquire load of
//!    `tail` (synchronizes with the consumer's Release) and re-check.
//! 3. Write the word, publish with a Release store of `head + 1`.
//!
//! **Consumer (dequeue):** symmetric, with the roles of `head`/`tail`
//! swapped.
//!
//! The cached shadows mean the common case never touches the remote
//! endpoint's cache line; each side pays a cross-core read only when it runs
//! out of its last observed window.
//!
//! # Single-writer invariants
//!
//! `cached_tail` is read and written only by the producer, `cached_head`
//! only by the consumer; both live behind `UnsafeCell` without atomics.
//! Slot `seq & mask` is written by the producer before the Release store
//! that publishes `seq + 1`, and read by the consumer only after an Acquire
//! load observes that store.

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use ringfan_table::prefetch::{prefetch_read, prefetch_write};

use crate::error::FabricError;
use crate::invariants::{debug_assert_cursor_advances, debug_assert_occupancy};

/// Slot distance of the stride prefetch hints, and their firing period: when
/// the owning cursor is a multiple of 8, hint the line 8 slots ahead. With
/// 8 words per cache line this touches each line exactly once.
const PREFETCH_STRIDE: u64 = 8;

/// Fixed-capacity single-producer/single-consumer ring.
///
/// The producer endpoint owns `head`, the consumer endpoint owns `tail`;
/// handing either role to more than one thread is not supported anywhere in
/// the fabric (each ring bridges exactly one (producer, consumer) pair).
#[repr(C)]
pub struct Ring {
    // === PRODUCER HOT ===
    /// Write cursor (written by producer, read by consumer).
    head: CachePadded<AtomicU64>,
    /// Producer's cached view of `tail` (avoids cross-core reads).
    cached_tail: CachePadded<UnsafeCell<u64>>,

    // === CONSUMER HOT ===
    /// Read cursor (written by consumer, read by producer).
    tail: CachePadded<AtomicU64>,
    /// Consumer's cached view of `head`.
    cached_head: CachePadded<UnsafeCell<u64>>,

    // === COLD ===
    /// Set by the producer just before it enqueues its end-of-stream word.
    /// A consumer that sees Empty on a closing ring re-polls once before
    /// rotating away; purely an optimization hint, not part of FIFO.
    closing: AtomicBool,
    mask: u64,

    /// Payload words. Zero-initialized; the cursor protocol guarantees a
    /// slot is only read after it was written and published.
    buffer: UnsafeCell<Box<[u64]>>,
}

// SAFETY: the cursor protocol above makes the ring safe to share between
// exactly one producing and one consuming thread; the unsynchronized cells
// are each touched by only one of them.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Creates a ring with `capacity` slots (must be a nonzero power of two).
    pub fn with_capacity(capacity: usize) -> Result<Self, FabricError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(FabricError::CapacityNotPowerOfTwo { got: capacity });
        }
        Ok(Self {
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            closing: AtomicBool::new(false),
            mask: capacity as u64 - 1,
            buffer: UnsafeCell::new(vec![0u64; capacity].into_boxed_slice()),
        })
    }

    /// Ring capacity in slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    /// Words currently in flight.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as usize
    }

    /// True when no word is in flight.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Attempts to enqueue one word. Returns `false` when the ring is full;
    /// a failed attempt has no side effect.
    #[inline]
    pub fn try_enqueue(&self, word: u64) -> bool {
        let head = self.head.load(Ordering::Relaxed);

        // Fast path: check against the cached consumer cursor.
        // SAFETY: cached_tail is only accessed from the producing thread.
        let mut tail = unsafe { *self.cached_tail.get() };
        if head.wrapping_sub(tail) > self.mask {
            // Slow path: refresh the shadow. The Acquire pairs with the
            // consumer's Release store of tail.
            tail = self.tail.load(Ordering::Acquire);
            // SAFETY: as above; single writer.
            unsafe { *self.cached_tail.get() = tail };
            if head.wrapping_sub(tail) > self.mask {
                return false;
            }
        }

        let idx = (head & self.mask) as usize;
        // SAFETY: slot `head & mask` is outside the consumer's readable
        // window until the Release store below publishes it.
        unsafe {
            (*self.buffer.get())[idx] = word;
        }

        let new_head = head.wrapping_add(1);
        debug_assert_cursor_advances!("head", head, new_head);
        debug_assert_occupancy!(new_head.wrapping_sub(tail), self.mask + 1);
        self.head.store(new_head, Ordering::Release);
        true
    }

    /// Enqueues one word, spinning until the consumer frees a slot. Returns
    /// the number of failed attempts (the caller's enqueue-failure counter).
    ///
    /// Live-lock is bounded by the paired consumer being strictly
    /// nonblocking: it either drains this ring or rotates past it, never
    /// waits on the producer.
    #[inline]
    pub fn enqueue_spin(&self, word: u64) -> u64 {
        let mut failures = 0;
        while !self.try_enqueue(word) {
            failures += 1;
            hint::spin_loop();
        }
        failures
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Attempts to dequeue one word. Returns `None` when the ring is empty.
    #[inline]
    pub fn try_dequeue(&self) -> Option<u64> {
        let tail = self.tail.load(Ordering::Relaxed);

        // Fast path: check against the cached producer cursor.
        // SAFETY: cached_head is only accessed from the consuming thread.
        let mut head = unsafe { *self.cached_head.get() };
        if tail == head {
            // Slow path: refresh. Pairs with the producer's Release store.
            head = self.head.load(Ordering::Acquire);
            // SAFETY: as above; single writer.
            unsafe { *self.cached_head.get() = head };
            if tail == head {
                return None;
            }
        }

        let idx = (tail & self.mask) as usize;
        // SAFETY: `tail < head`, so this slot was written and published by
        // the producer before the Acquire load above observed it.
        let word = unsafe { (*self.buffer.get())[idx] };

        let new_tail = tail.wrapping_add(1);
        debug_assert_cursor_advances!("tail", tail, new_tail);
        self.tail.store(new_tail, Ordering::Release);
        Some(word)
    }

    // ---------------------------------------------------------------------
    // TERMINATION HINT
    // ---------------------------------------------------------------------

    /// Producer-side: flags that the end-of-stream word is about to be
    /// enqueued.
    #[inline]
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }

    /// Consumer-side: true once the producer has flagged termination.
    #[inline]
    pub fn closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // PREFETCH HINTS (never observable; no-ops off x86_64)
    // ---------------------------------------------------------------------

    /// Hint that the cursor lines are about to be touched.
    #[inline]
    pub fn prefetch_metadata(&self) {
        prefetch_read(&self.head as *const CachePadded<AtomicU64>);
        prefetch_read(&self.tail as *const CachePadded<AtomicU64>);
    }

    /// Hint the next expected slot line: the producer's write target when
    /// `for_write`, otherwise the consumer's read target.
    #[inline]
    pub fn prefetch_data(&self, for_write: bool) {
        let seq = if for_write {
            self.head.load(Ordering::Relaxed)
        } else {
            self.tail.load(Ordering::Relaxed)
        };
        let idx = (seq & self.mask) as usize;
        // SAFETY: pointer derivation only; the line is never dereferenced.
        let slot = unsafe { (*self.buffer.get()).as_ptr().add(idx) };
        if for_write {
            prefetch_write(slot);
        } else {
            prefetch_read(slot);
        }
    }

    /// Producer stride hint: every 8th slot, fetch the line 8 slots ahead.
    #[inline]
    pub fn prefetch_write_ahead(&self) {
        let head = self.head.load(Ordering::Relaxed);
        if head & (PREFETCH_STRIDE - 1) == 0 {
            let idx = (head.wrapping_add(PREFETCH_STRIDE) & self.mask) as usize;
            // SAFETY: pointer derivation only.
            unsafe { prefetch_write((*self.buffer.get()).as_ptr().add(idx)) };
        }
    }

    /// Consumer stride hint: every 8th slot, fetch the line 8 slots ahead.
    #[inline]
    pub fn prefetch_read_ahead(&self) {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail & (PREFETCH_STRIDE - 1) == 0 {
            let idx = (tail.wrapping_add(PREFETCH_STRIDE) & self.mask) as usize;
            // SAFETY: pointer derivation only.
            unsafe { prefetch_read((*self.buffer.get()).as_ptr().add(idx)) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_must_be_power_of_two() {
        assert!(matches!(
            Ring::with_capacity(12),
            Err(FabricError::CapacityNotPowerOfTwo { got: 12 })
        ));
        assert!(Ring::with_capacity(0).is_err());
        assert!(Ring::with_capacity(16).is_ok());
    }

    #[test]
    fn single_word_round_trip() {
        let ring = Ring::with_capacity(16).unwrap();
        assert!(ring.try_enqueue(42));
        assert_eq!(ring.try_dequeue(), Some(42));
        assert_eq!(ring.try_dequeue(), None);
    }

    #[test]
    fn fill_reports_full_then_drains_in_order() {
        let ring = Ring::with_capacity(16).unwrap();
        for i in 0..16 {
            assert!(ring.try_enqueue(i), "failed at {i}");
        }
        assert!(!ring.try_enqueue(100));
        assert_eq!(ring.len(), 16);

        for i in 0..16 {
            assert_eq!(ring.try_dequeue(), Some(i));
        }
        assert_eq!(ring.try_dequeue(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn wraparound_preserves_fifo() {
        let ring = Ring::with_capacity(4).unwrap();
        for round in 0..10u64 {
            let base = round * 4;
            for i in 0..4 {
                assert!(ring.try_enqueue(base + i));
            }
            for i in 0..4 {
                assert_eq!(ring.try_dequeue(), Some(base + i));
            }
        }
    }

    #[test]
    fn enqueue_spin_counts_failures() {
        let ring = Ring::with_capacity(4).unwrap();
        for i in 0..4 {
            assert_eq!(ring.enqueue_spin(i), 0);
        }
        // The ring is full before the spinning producer starts, so it must
        // fail at least once before the consumer side frees a slot.
        std::thread::scope(|s| {
            let handle = s.spawn(|| ring.enqueue_spin(99));
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert_eq!(ring.try_dequeue(), Some(0));
            let failures = handle.join().unwrap();
            assert!(failures > 0);
        });
    }

    #[test]
    fn closing_flag_is_sticky() {
        let ring = Ring::with_capacity(8).unwrap();
        assert!(!ring.closing());
        ring.mark_closing();
        assert!(ring.closing());
    }

    #[test]
    fn two_thread_stream_is_a_prefix_in_order() {
        let ring = Ring::with_capacity(64).unwrap();
        const N: u64 = 100_000;

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..N {
                    ring.enqueue_spin(i);
                }
            });
            s.spawn(|| {
                let mut expected = 0;
                while expected < N {
                    if let Some(word) = ring.try_dequeue() {
                        assert_eq!(word, expected);
                        expected += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });
        });
    }
}
