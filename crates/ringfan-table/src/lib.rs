//! Counting hash-table partitions for the ringfan aggregation engine.
//!
//! Each consumer thread in the fan-out fabric owns exactly one partition and
//! drives it through the [`CountTable`] contract: batched inserts behind a
//! software-prefetch pipeline, symmetric batched finds, and scalar
//! no-prefetch fallbacks. Keys arrive as *packed words* (xxh64 hash in the
//! upper 32 bits, key value in the lower 32), so a partition never rehashes
//! on the hot path (see [`kv`]).
//!
//! # Example
//!
//! ```
//! use ringfan_table::{pack_key, CountTable, KeyRecord, ProbeTable};
//!
//! let mut partition = ProbeTable::with_capacity(1024).unwrap();
//! let rec = KeyRecord::packed(pack_key(42));
//!
//! partition.insert_batch(&[rec, rec]);
//! partition.flush_insert_queue();
//!
//! assert_eq!(partition.find_noprefetch(&rec).unwrap().value, 2);
//! ```

mod kv;
pub mod prefetch;
mod probe;

pub use kv::{
    pack_key, packed_hash, packed_key, KeyRecord, QueueKind, ValueRecord, EMPTY_KEY, KEY_MASK,
};
pub use probe::{ProbeTable, PIPELINE_DEPTH};

use std::path::Path;
use thiserror::Error;

/// Errors from partition construction and diagnostics output.
#[derive(Debug, Error)]
pub enum TableError {
    /// Partition capacity must be a nonzero power of two (slot indexing is
    /// mask-based).
    #[error("table capacity must be a nonzero power of two, got {got}")]
    CapacityNotPowerOfTwo { got: usize },

    /// Writing the partition dump failed.
    #[error("failed to write table dump: {0}")]
    Io(#[from] std::io::Error),
}

/// The partition contract consumed by the fan-out fabric.
///
/// A partition is exclusively owned by one consumer thread; no method is
/// required to be thread-safe. Batch operations are allowed to defer work
/// behind an internal pipeline; callers must `flush_*` before reading
/// results or handing the partition off.
pub trait CountTable {
    /// Stages one packed key for insertion through the pipeline. Equivalent
    /// to an `insert_batch` of one.
    fn insert(&mut self, rec: &KeyRecord) {
        self.insert_batch(std::slice::from_ref(rec));
    }

    /// Stages a batch of packed keys for insertion. May defer actual probes.
    fn insert_batch(&mut self, keys: &[KeyRecord]);

    /// Completes every deferred insert.
    fn flush_insert_queue(&mut self);

    /// Inserts one record immediately, bypassing the prefetch pipeline.
    fn insert_noprefetch(&mut self, rec: &KeyRecord);

    /// Stages a batch of lookups; completed hits are appended to `out`.
    fn find_batch(&mut self, keys: &[KeyRecord], out: &mut Vec<ValueRecord>);

    /// Completes every deferred lookup, appending hits to `out`.
    fn flush_find_queue(&mut self, out: &mut Vec<ValueRecord>);

    /// Looks up one record immediately, bypassing the prefetch pipeline.
    fn find_noprefetch(&mut self, rec: &KeyRecord) -> Option<ValueRecord>;

    /// Hint that the caller is about to drive the given pipeline; the
    /// partition may re-stage its own prefetches. Never observable.
    fn prefetch_queue(&mut self, queue: QueueKind);

    /// Number of occupied slots.
    fn fill(&self) -> usize;

    /// Total slot count.
    fn capacity(&self) -> usize;

    /// Probe steps taken beyond a home slot.
    fn num_reprobes(&self) -> u64;

    /// Probe steps that stayed within the home cache line.
    fn num_soft_reprobes(&self) -> u64;

    /// Writes `key count` lines for every occupied slot.
    fn print_to_file(&self, path: &Path) -> Result<(), TableError>;
}
