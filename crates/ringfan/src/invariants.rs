//! Debug assertion macros for fabric invariants.
//!
//! Active only in debug builds, so the hot loops carry zero overhead in
//! release. Each macro states the invariant it checks; the integration and
//! property tests exercise the same conditions end to end.

// =============================================================================
// INV-OCC: Bounded occupancy
// =============================================================================

/// Assert that a ring never holds more than its capacity.
///
/// **Invariant**: `0 ≤ head - tail ≤ capacity` (u64 wrapping arithmetic)
macro_rules! debug_assert_occupancy {
    ($occupied:expr, $capacity:expr) => {
        debug_assert!(
            $occupied <= $capacity,
            "INV-OCC violated: {} words in a ring of {}",
            $occupied,
            $capacity
        )
    };
}

// =============================================================================
// INV-CURSOR: Monotonic cursors
// =============================================================================

/// Assert that a cursor only moves forward.
macro_rules! debug_assert_cursor_advances {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-CURSOR violated: {} moved backwards from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-PART: Partition residue
// =============================================================================

/// Assert that a key is routed to the consumer that owns its residue class.
///
/// **Invariant**: destination column = `key % n_cons`
macro_rules! debug_assert_partition {
    ($key:expr, $n_cons:expr, $dest:expr) => {
        debug_assert!(
            ($key % $n_cons as u64) as usize == $dest,
            "INV-PART violated: key {} routed to column {} of {}",
            $key,
            $dest,
            $n_cons
        )
    };
}

// =============================================================================
// INV-WIRE: Sentinel reservation
// =============================================================================

/// Assert that a packed payload does not collide with the end-of-stream word.
macro_rules! debug_assert_not_sentinel {
    ($word:expr) => {
        debug_assert!(
            $word != crate::SENTINEL,
            "INV-WIRE violated: payload collides with the end-of-stream word"
        )
    };
}

pub(crate) use debug_assert_cursor_advances;
pub(crate) use debug_assert_not_sentinel;
pub(crate) use debug_assert_occupancy;
pub(crate) use debug_assert_partition;
