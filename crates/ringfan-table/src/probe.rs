//! Open-addressing counting table with a software-prefetch probe pipeline.
//!
//! # Batched prefetch-then-probe
//!
//! A cache-cold probe costs a full memory stall. Instead of probing each key
//! as it arrives, [`ProbeTable`] runs a small fixed-depth pipeline: admitting
//! a key computes its home slot and issues a prefetch for that bucket line,
//! and only when the pipeline is full is the *oldest* staged key actually
//! probed, by which point its line has had the pipeline depth's worth of
//! work to arrive in L1. `flush_insert_queue`/`flush_find_queue` drain the
//! remainder.
//!
//! The pipeline defers work but never reorders it per caller: staged keys
//! complete in admission order.
//!
//! # Slot layout
//!
//! Entries are 8 bytes (`key: u32`, `count: u32`), eight to a cache line.
//! Key 0 marks an empty slot, so callers must never insert key 0. Probing is
//! linear from the home slot `hash & mask`; the home slot comes straight from
//! the upper 32 bits of the packed payload word, so the insert path never
//! rehashes.

use crate::kv::{packed_hash, packed_key, KeyRecord, QueueKind, ValueRecord, EMPTY_KEY};
use crate::prefetch::{prefetch_read, prefetch_write};
use crate::{CountTable, TableError};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Depth of the insert/find staging pipelines.
pub const PIPELINE_DEPTH: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Entry {
    key: u32,
    count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Staged {
    slot: usize,
    rec: KeyRecord,
}

/// Fixed-depth FIFO of staged probes.
#[derive(Debug)]
struct Pipeline {
    slots: [Staged; PIPELINE_DEPTH],
    head: usize,
    len: usize,
}

impl Pipeline {
    const fn new() -> Self {
        Self {
            slots: [Staged {
                slot: 0,
                rec: KeyRecord { key: 0, id: 0 },
            }; PIPELINE_DEPTH],
            head: 0,
            len: 0,
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.len == PIPELINE_DEPTH
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn push(&mut self, staged: Staged) {
        debug_assert!(!self.is_full());
        self.slots[(self.head + self.len) % PIPELINE_DEPTH] = staged;
        self.len += 1;
    }

    #[inline]
    fn pop(&mut self) -> Staged {
        debug_assert!(!self.is_empty());
        let staged = self.slots[self.head];
        self.head = (self.head + 1) % PIPELINE_DEPTH;
        self.len -= 1;
        staged
    }

    fn iter(&self) -> impl Iterator<Item = &Staged> + '_ {
        (0..self.len).map(move |i| &self.slots[(self.head + i) % PIPELINE_DEPTH])
    }
}

/// Linear-probing counting hash table for packed 32-bit keys.
///
/// One instance is a single partition: it is owned and mutated by exactly one
/// thread, so nothing here is atomic.
#[derive(Debug)]
pub struct ProbeTable {
    entries: Box<[Entry]>,
    mask: usize,
    fill: usize,
    num_reprobes: u64,
    num_soft_reprobes: u64,
    insert_queue: Pipeline,
    find_queue: Pipeline,
}

impl ProbeTable {
    /// Creates a partition with `capacity` slots (must be a power of two).
    pub fn with_capacity(capacity: usize) -> Result<Self, TableError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(TableError::CapacityNotPowerOfTwo { got: capacity });
        }
        Ok(Self {
            entries: vec![Entry::default(); capacity].into_boxed_slice(),
            mask: capacity - 1,
            fill: 0,
            num_reprobes: 0,
            num_soft_reprobes: 0,
            insert_queue: Pipeline::new(),
            find_queue: Pipeline::new(),
        })
    }

    #[inline]
    fn home_slot(&self, word: u64) -> usize {
        (packed_hash(word) as usize) & self.mask
    }

    /// Cache-line number of a slot, from its address (entries are 8 bytes,
    /// lines 64).
    #[inline]
    fn cache_line(&self, slot: usize) -> usize {
        (self.entries.as_ptr() as usize + slot * core::mem::size_of::<Entry>()) >> 6
    }

    #[inline]
    fn step(&mut self, slot: usize, home_line: usize) -> usize {
        let next = (slot + 1) & self.mask;
        self.num_reprobes += 1;
        if self.cache_line(next) == home_line {
            self.num_soft_reprobes += 1;
        }
        next
    }

    fn complete_insert(&mut self, staged: Staged) {
        let key = packed_key(staged.rec.key);
        debug_assert_ne!(key, EMPTY_KEY, "key 0 is reserved for empty slots");

        let home_line = self.cache_line(staged.slot);
        let mut slot = staged.slot;
        let mut probed = 0usize;
        loop {
            let entry = &mut self.entries[slot];
            if entry.key == key {
                entry.count += 1;
                return;
            }
            if entry.key == EMPTY_KEY {
                *entry = Entry { key, count: 1 };
                self.fill += 1;
                return;
            }
            probed += 1;
            assert!(
                probed < self.entries.len(),
                "partition exhausted: {} slots all occupied",
                self.entries.len()
            );
            slot = self.step(slot, home_line);
        }
    }

    fn complete_find(&mut self, staged: Staged) -> Option<ValueRecord> {
        let key = packed_key(staged.rec.key);
        let home_line = self.cache_line(staged.slot);
        let mut slot = staged.slot;
        let mut probed = 0usize;
        loop {
            let entry = self.entries[slot];
            if entry.key == key {
                return Some(ValueRecord {
                    value: entry.count as u64,
                    id: staged.rec.id,
                });
            }
            if entry.key == EMPTY_KEY {
                return None;
            }
            probed += 1;
            if probed >= self.entries.len() {
                return None;
            }
            slot = self.step(slot, home_line);
        }
    }
}

impl CountTable for ProbeTable {
    fn insert_batch(&mut self, keys: &[KeyRecord]) {
        for rec in keys {
            let slot = self.home_slot(rec.key);
            prefetch_write(&self.entries[slot]);
            if self.insert_queue.is_full() {
                let oldest = self.insert_queue.pop();
                self.complete_insert(oldest);
            }
            self.insert_queue.push(Staged { slot, rec: *rec });
        }
    }

    fn flush_insert_queue(&mut self) {
        while !self.insert_queue.is_empty() {
            let oldest = self.insert_queue.pop();
            self.complete_insert(oldest);
        }
    }

    fn insert_noprefetch(&mut self, rec: &KeyRecord) {
        let slot = self.home_slot(rec.key);
        self.complete_insert(Staged { slot, rec: *rec });
    }

    fn find_batch(&mut self, keys: &[KeyRecord], out: &mut Vec<ValueRecord>) {
        for rec in keys {
            let slot = self.home_slot(rec.key);
            prefetch_read(&self.entries[slot]);
            if self.find_queue.is_full() {
                let oldest = self.find_queue.pop();
                if let Some(value) = self.complete_find(oldest) {
                    out.push(value);
                }
            }
            self.find_queue.push(Staged { slot, rec: *rec });
        }
    }

    fn flush_find_queue(&mut self, out: &mut Vec<ValueRecord>) {
        while !self.find_queue.is_empty() {
            let oldest = self.find_queue.pop();
            if let Some(value) = self.complete_find(oldest) {
                out.push(value);
            }
        }
    }

    fn find_noprefetch(&mut self, rec: &KeyRecord) -> Option<ValueRecord> {
        let slot = self.home_slot(rec.key);
        self.complete_find(Staged { slot, rec: *rec })
    }

    fn prefetch_queue(&mut self, queue: QueueKind) {
        // Re-warm the bucket lines of everything currently staged; the lines
        // prefetched at admission may have been evicted while the caller was
        // off draining rings.
        match queue {
            QueueKind::Insert => {
                for staged in self.insert_queue.iter() {
                    prefetch_write(&self.entries[staged.slot]);
                }
            }
            QueueKind::Find => {
                for staged in self.find_queue.iter() {
                    prefetch_read(&self.entries[staged.slot]);
                }
            }
        }
    }

    fn fill(&self) -> usize {
        self.fill
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn num_reprobes(&self) -> u64 {
        self.num_reprobes
    }

    fn num_soft_reprobes(&self) -> u64 {
        self.num_soft_reprobes
    }

    fn print_to_file(&self, path: &Path) -> Result<(), TableError> {
        let mut out = BufWriter::new(File::create(path)?);
        for entry in self.entries.iter().filter(|e| e.key != EMPTY_KEY) {
            writeln!(out, "{} {}", entry.key, entry.count)?;
        }
        out.flush()?;
        tracing::debug!(path = %path.display(), entries = self.fill, "partition dumped");
        Ok(())
    }
}
