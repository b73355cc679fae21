//! The `n_prod × n_cons` fabric of SPSC rings.
//!
//! One contiguous row-major allocation, owned by the controller for the
//! whole run. Producer `p` writes the rings of row `p`; consumer `c` reads
//! the rings of column `c`; exactly one ring bridges each pair. The matrix
//! itself has no operations; it is a naming structure over the block, and
//! worker threads borrow row/column views for the duration of a
//! `thread::scope`.

use crate::error::FabricError;
use crate::ring::Ring;

/// Row-major block of rings bridging every (producer, consumer) pair.
pub struct QueueMatrix {
    rings: Box<[Ring]>,
    n_prod: usize,
    n_cons: usize,
}

impl QueueMatrix {
    /// Allocates the fabric: `n_prod * n_cons` rings of `capacity` slots.
    pub fn new(n_prod: usize, n_cons: usize, capacity: usize) -> Result<Self, FabricError> {
        if n_prod == 0 || n_cons == 0 {
            return Err(FabricError::ZeroShards { n_prod, n_cons });
        }
        let rings = (0..n_prod * n_cons)
            .map(|_| Ring::with_capacity(capacity))
            .collect::<Result<Vec<_>, _>>()?
            .into_boxed_slice();
        Ok(Self {
            rings,
            n_prod,
            n_cons,
        })
    }

    /// Number of producer rows.
    #[inline]
    pub fn n_prod(&self) -> usize {
        self.n_prod
    }

    /// Number of consumer columns.
    #[inline]
    pub fn n_cons(&self) -> usize {
        self.n_cons
    }

    /// The ring bridging producer `p` and consumer `c`.
    #[inline]
    pub fn ring(&self, p: usize, c: usize) -> &Ring {
        &self.rings[p * self.n_cons + c]
    }

    /// Producer `p`'s view: one ring per consumer column.
    pub fn producer_row(&self, p: usize) -> Vec<&Ring> {
        (0..self.n_cons).map(|c| self.ring(p, c)).collect()
    }

    /// Consumer `c`'s view: one ring per producer row.
    pub fn consumer_column(&self, c: usize) -> Vec<&Ring> {
        (0..self.n_prod).map(|p| self.ring(p, c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_shards() {
        assert!(matches!(
            QueueMatrix::new(0, 4, 16),
            Err(FabricError::ZeroShards { .. })
        ));
        assert!(matches!(
            QueueMatrix::new(4, 0, 16),
            Err(FabricError::ZeroShards { .. })
        ));
    }

    #[test]
    fn row_and_column_views_alias_the_same_rings() {
        let matrix = QueueMatrix::new(3, 2, 16).unwrap();

        for p in 0..3 {
            let row = matrix.producer_row(p);
            assert_eq!(row.len(), 2);
            for (c, ring) in row.iter().enumerate() {
                // The row view and the column view name the same ring.
                let from_column = matrix.consumer_column(c)[p];
                assert!(std::ptr::eq(*ring, from_column));
            }
        }
    }

    #[test]
    fn each_pair_gets_a_distinct_ring() {
        let matrix = QueueMatrix::new(2, 2, 16).unwrap();
        let matrix_ref = &matrix;
        let all: Vec<*const Ring> = (0..2)
            .flat_map(|p| (0..2).map(move |c| matrix_ref.ring(p, c) as *const Ring))
            .collect();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!(!std::ptr::eq(*a, *b));
            }
        }
    }

    #[test]
    fn words_enqueued_on_a_row_surface_on_the_column() {
        let matrix = QueueMatrix::new(2, 2, 16).unwrap();
        matrix.producer_row(1)[0].try_enqueue(7);
        assert_eq!(matrix.consumer_column(0)[1].try_dequeue(), Some(7));
    }
}
