//! Error types for fabric construction and run configuration.
//!
//! Transient queue conditions (ring Full on enqueue, Empty on dequeue) are
//! not errors: they are ordinary return values on the hot path, recovered
//! locally by retry or rotation. Everything here is fatal at startup.

use ringfan_table::TableError;
use thiserror::Error;

/// Errors that abort a run before any worker thread starts.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Ring capacity is mask-indexed and must be a nonzero power of two.
    #[error("queue capacity must be a nonzero power of two, got {got}")]
    CapacityNotPowerOfTwo { got: usize },

    /// Both sides of the fabric need at least one shard.
    #[error("shard counts must be nonzero (n_prod {n_prod}, n_cons {n_cons})")]
    ZeroShards { n_prod: usize, n_cons: usize },

    /// The workload replays its key stream at least once.
    #[error("insert factor must be at least 1")]
    ZeroInsertFactor,

    /// Not enough CPUs to pin every worker plus the controller.
    #[error(
        "{needed} worker CPUs requested but only {available} available \
         ({reserved} reserved for the controller)"
    )]
    InsufficientCpus {
        needed: usize,
        available: usize,
        reserved: usize,
    },

    /// An assigned CPU list does not match its shard count.
    #[error("assigned {side} CPU list has {got} entries, need {need}")]
    BadCpuList {
        side: &'static str,
        need: usize,
        got: usize,
    },

    /// CPU enumeration failed while pinning was requested.
    #[error("could not enumerate CPU cores for pinning")]
    CpuEnumeration,

    /// Partition construction failed.
    #[error(transparent)]
    Table(#[from] TableError),
}
