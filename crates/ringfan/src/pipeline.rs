//! Consumer-side dequeue/insert pipeline.
//!
//! A consumer round-robins over its column of rings (one per producer),
//! draining up to [`CONS_BATCH`] words per visit into a staging array and
//! submitting full batches to its table partition. Submission overlaps the
//! table's probe work with cache fill for the *next* rings the consumer will
//! touch: metadata of the column two steps ahead, data of the column one
//! step ahead.
//!
//! Rotation keeps the consumer strictly nonblocking: Empty is not a wait,
//! it flushes whatever is staged and moves to the next producer. A lagging
//! producer is serviced again next round, and no producer can hold the
//! consumer for more than one batch per visit.
//!
//! The pipeline exits once it has seen every producer's end-of-stream word.
//! Any residual staging is submitted after the loop and the table's own
//! deferred pipeline flushed, so a clean exit loses nothing.

use ringfan_table::{CountTable, KeyRecord, QueueKind};
use tracing::{debug, trace};

use crate::ring::Ring;
use crate::SENTINEL;

/// Staging capacity, and the per-visit drain bound.
pub const CONS_BATCH: usize = 16;

/// Staging array for one insert batch.
#[repr(C, align(64))]
struct Staging {
    recs: [KeyRecord; CONS_BATCH],
    len: usize,
}

/// Summary a consumer hands back to the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainSummary {
    /// Payloads inserted (sentinels excluded).
    pub num_inserts: u64,
    /// Empty observations while rotating.
    pub num_deq_failures: u64,
    /// End-of-stream words seen; equals `n_prod` on clean exit.
    pub sentinels_seen: u32,
}

/// Drains one consumer's column of rings into its table partition.
pub struct ConsumerPipeline<'a, T: CountTable> {
    column: Vec<&'a Ring>,
    table: T,
    staging: Staging,
    cursor: usize,
    finished_producers: usize,
    no_prefetch: bool,
    num_nops: u32,
    summary: DrainSummary,
}

impl<'a, T: CountTable> ConsumerPipeline<'a, T> {
    /// Takes the consumer's column view (one ring per producer) and its
    /// exclusively owned partition.
    pub fn new(column: Vec<&'a Ring>, table: T, no_prefetch: bool, num_nops: u32) -> Self {
        debug_assert!(!column.is_empty());
        Self {
            column,
            table,
            staging: Staging {
                recs: [KeyRecord::default(); CONS_BATCH],
                len: 0,
            },
            cursor: 0,
            finished_producers: 0,
            no_prefetch,
            num_nops,
            summary: DrainSummary::default(),
        }
    }

    /// Runs until every producer's end-of-stream word has been consumed,
    /// then returns the partition and the drain summary.
    pub fn run(mut self) -> (T, DrainSummary) {
        let n_prod = self.column.len();

        while self.finished_producers < n_prod {
            if !self.no_prefetch {
                self.table.prefetch_queue(QueueKind::Insert);
            }

            for _ in 0..CONS_BATCH {
                let ring = self.column[self.cursor];
                let word = match ring.try_dequeue() {
                    Some(word) => word,
                    None => {
                        // A closing producer may be racing its sentinel in;
                        // give the ring one more look before rotating.
                        match if ring.closing() { ring.try_dequeue() } else { None } {
                            Some(word) => word,
                            None => {
                                self.summary.num_deq_failures += 1;
                                if self.staging.len > 0 {
                                    self.submit_batch();
                                }
                                break;
                            }
                        }
                    }
                };

                ring.prefetch_read_ahead();

                if word == SENTINEL {
                    self.finished_producers += 1;
                    self.summary.sentinels_seen += 1;
                    trace!(
                        producer = self.cursor,
                        finished = self.finished_producers,
                        "end of stream"
                    );
                    continue;
                }

                self.absorb(word);
            }

            self.cursor += 1;
            if self.cursor == n_prod {
                self.cursor = 0;
            }
        }

        // The Empty-flush usually covers the tail, but a sentinel landing on
        // the last slot of a sweep exits the loop with records still staged.
        if self.staging.len > 0 {
            self.submit_batch();
        }
        self.table.flush_insert_queue();

        debug!(
            inserts = self.summary.num_inserts,
            deq_failures = self.summary.num_deq_failures,
            "consumer column drained"
        );
        (self.table, self.summary)
    }

    #[inline]
    fn absorb(&mut self, word: u64) {
        for _ in 0..self.num_nops {
            std::hint::spin_loop();
        }
        self.summary.num_inserts += 1;

        // The packed word carries hash and key; it doubles as the record id.
        let rec = KeyRecord::packed(word);
        if self.no_prefetch {
            self.table.insert_noprefetch(&rec);
            return;
        }

        self.staging.recs[self.staging.len] = rec;
        self.staging.len += 1;
        if self.staging.len == CONS_BATCH {
            self.submit_batch();
        }
    }

    /// Submits the staged batch, warming the rings the rotation will visit
    /// next while the table probes.
    fn submit_batch(&mut self) {
        let n_prod = self.column.len();
        self.column[(self.cursor + 2) % n_prod].prefetch_metadata();
        self.column[(self.cursor + 1) % n_prod].prefetch_data(false);

        self.table.insert_batch(&self.staging.recs[..self.staging.len]);
        self.staging.len = 0;
    }
}
