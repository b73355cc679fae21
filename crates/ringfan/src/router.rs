//! Producer-side partition routing and micro-batching.
//!
//! Each producer owns one `PartitionRouter` over its row of the queue
//! matrix. A routed key goes to column `key % n_cons`, packed as
//! `(xxh64(key) << 32) | (key & 0xffff_ffff)` so the consumer's table never
//! rehashes. Payloads accumulate in per-destination micro-batches; the ring
//! is only touched when a batch fills, with its metadata and data lines
//! prefetched one and two payloads earlier so the drain runs against warm
//! lines.
//!
//! Dense keys spread uniformly under the residue partition; the router makes
//! no balance promise for adversarial key streams.

use ringfan_table::pack_key;
use tracing::debug;

use crate::invariants::{debug_assert_not_sentinel, debug_assert_partition};
use crate::ring::Ring;
use crate::SENTINEL;

/// Payloads per destination micro-batch.
pub const PROD_BATCH: usize = 16;

/// Routes one producer's key stream into its row of rings.
pub struct PartitionRouter<'a> {
    row: Vec<&'a Ring>,
    buffers: Vec<[u64; PROD_BATCH]>,
    buffered: Vec<usize>,
    routed: u64,
    num_enq_failures: u64,
}

impl<'a> PartitionRouter<'a> {
    /// Takes ownership of the producer's row view (one ring per consumer).
    pub fn new(row: Vec<&'a Ring>) -> Self {
        let n_cons = row.len();
        debug_assert!(n_cons > 0);
        Self {
            row,
            buffers: vec![[0; PROD_BATCH]; n_cons],
            buffered: vec![0; n_cons],
            routed: 0,
            num_enq_failures: 0,
        }
    }

    /// Routes one key: pack, pick the owning column, buffer, drain on fill.
    #[inline]
    pub fn route(&mut self, key: u64) {
        let dest = (key % self.row.len() as u64) as usize;
        debug_assert_partition!(key, self.row.len(), dest);

        let word = pack_key(key);
        debug_assert_not_sentinel!(word);

        let fill = self.buffered[dest];
        self.buffers[dest][fill] = word;
        self.buffered[dest] = fill + 1;

        // Warm the destination ring while the last payloads of the batch are
        // still being produced: cursors two slots early, data line one slot
        // early, then drain.
        match self.buffered[dest] {
            f if f == PROD_BATCH - 2 => self.row[dest].prefetch_metadata(),
            f if f == PROD_BATCH - 1 => self.row[dest].prefetch_data(true),
            f if f == PROD_BATCH => self.drain(dest),
            _ => {}
        }
    }

    /// Drains one destination's micro-batch into its ring, spinning per word
    /// until the consumer frees space.
    fn drain(&mut self, dest: usize) {
        let ring = self.row[dest];
        let fill = self.buffered[dest];
        for i in 0..fill {
            self.num_enq_failures += ring.enqueue_spin(self.buffers[dest][i]);
            ring.prefetch_write_ahead();
        }
        self.routed += fill as u64;
        self.buffered[dest] = 0;
    }

    /// Drains every partially filled micro-batch.
    pub fn flush(&mut self) {
        for dest in 0..self.row.len() {
            if self.buffered[dest] > 0 {
                self.drain(dest);
            }
        }
    }

    /// End of stream: flush all partial batches, then flag each ring as
    /// closing and enqueue exactly one end-of-stream word per column.
    ///
    /// Partials must go out before sentinels: a consumer treats the
    /// sentinel as this producer's last word on that column.
    pub fn finish(&mut self) {
        self.flush();
        for ring in &self.row {
            ring.mark_closing();
            self.num_enq_failures += ring.enqueue_spin(SENTINEL);
        }
        debug!(
            routed = self.routed,
            enq_failures = self.num_enq_failures,
            "producer stream closed"
        );
    }

    /// Payloads handed to rings so far (sentinels excluded).
    #[inline]
    pub fn routed(&self) -> u64 {
        self.routed
    }

    /// Cumulative failed enqueue attempts (ring-full retries).
    #[inline]
    pub fn num_enq_failures(&self) -> u64 {
        self.num_enq_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::QueueMatrix;
    use ringfan_table::{packed_key, KEY_MASK};

    #[test]
    fn keys_land_on_their_residue_column() {
        let matrix = QueueMatrix::new(1, 4, 64).unwrap();
        let mut router = PartitionRouter::new(matrix.producer_row(0));

        for key in 1..=64u64 {
            router.route(key);
        }
        router.flush();

        for c in 0..4 {
            let ring = matrix.ring(0, c);
            while let Some(word) = ring.try_dequeue() {
                assert_eq!((word & KEY_MASK) % 4, c as u64);
            }
        }
    }

    #[test]
    fn batches_drain_only_when_full() {
        let matrix = QueueMatrix::new(1, 1, 64).unwrap();
        let mut router = PartitionRouter::new(matrix.producer_row(0));

        for key in 1..PROD_BATCH as u64 {
            router.route(key);
        }
        // One short of a full batch: nothing on the ring yet.
        assert!(matrix.ring(0, 0).is_empty());
        assert_eq!(router.routed(), 0);

        router.route(PROD_BATCH as u64);
        assert_eq!(matrix.ring(0, 0).len(), PROD_BATCH);
        assert_eq!(router.routed(), PROD_BATCH as u64);
    }

    #[test]
    fn column_order_matches_route_order() {
        let matrix = QueueMatrix::new(1, 2, 256).unwrap();
        let mut router = PartitionRouter::new(matrix.producer_row(0));

        let keys: Vec<u64> = (1..=100).collect();
        for &key in &keys {
            router.route(key);
        }
        router.flush();

        for c in 0..2u64 {
            let expected: Vec<u64> = keys.iter().copied().filter(|k| k % 2 == c).collect();
            let ring = matrix.ring(0, c as usize);
            let mut seen = Vec::new();
            while let Some(word) = ring.try_dequeue() {
                seen.push(word & KEY_MASK);
            }
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn finish_flushes_partials_then_sentinels_every_column() {
        let matrix = QueueMatrix::new(1, 3, 64).unwrap();
        let mut router = PartitionRouter::new(matrix.producer_row(0));

        // 5 keys: all three columns hold partial batches.
        for key in 1..=5u64 {
            router.route(key);
        }
        router.finish();

        assert_eq!(router.routed(), 5);
        let mut payloads = 0;
        for c in 0..3 {
            let ring = matrix.ring(0, c);
            assert!(ring.closing());
            let mut last = None;
            while let Some(word) = ring.try_dequeue() {
                last = Some(word);
                if word != SENTINEL {
                    payloads += 1;
                }
            }
            // The sentinel is the final word on every column.
            assert_eq!(last, Some(SENTINEL));
        }
        assert_eq!(payloads, 5);
    }

    #[test]
    fn payloads_carry_the_packed_key() {
        let matrix = QueueMatrix::new(1, 1, 64).unwrap();
        let mut router = PartitionRouter::new(matrix.producer_row(0));
        router.route(3);
        router.flush();

        let word = matrix.ring(0, 0).try_dequeue().unwrap();
        assert_eq!(packed_key(word) as u64, 3);
        assert_eq!(word, ringfan_table::pack_key(3));
    }
}
