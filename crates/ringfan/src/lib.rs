//! ringfan - Partitioned Key Aggregation over an SPSC Fan-Out Fabric
//!
//! Producers draw 64-bit keys from a source, hash-partition them across
//! consumers through an `n_prod × n_cons` matrix of bounded SPSC rings, and
//! consumers batch-insert into private partitions of a counting hash table
//! ([`ringfan_table`]) with software-pipelined prefetching.
//!
//! Every (producer, consumer) pair is bridged by exactly one ring, so there
//! is no producer-producer or consumer-consumer contention anywhere on the
//! data path: one writer advances a ring's head, one reader advances its
//! tail, and everything else is thread-private.
//!
//! # Example
//!
//! ```no_run
//! use ringfan::{Config, Controller, Pinning};
//!
//! let cfg = Config::default()
//!     .with_shards(2, 2)
//!     .with_num_inserts(1 << 16)
//!     .with_pinning(Pinning::None);
//!
//! let report = Controller::run(cfg).unwrap();
//! report.summarize();
//! ```

mod backoff;
mod config;
mod controller;
mod error;
mod generator;
mod invariants;
mod matrix;
mod pipeline;
mod ring;
mod router;
mod shard;
mod sync;

pub use backoff::Backoff;
pub use config::{Config, Pinning, RunMode};
pub use controller::Controller;
pub use error::FabricError;
pub use generator::{materialize_zipf, KeyStream, SequentialKeys, Xorwow, ZipfianKeys};
pub use matrix::QueueMatrix;
pub use pipeline::{ConsumerPipeline, DrainSummary, CONS_BATCH};
pub use ring::Ring;
pub use router::{PartitionRouter, PROD_BATCH};
pub use shard::{RunReport, Shard, ShardRole, ThreadStats};
pub use sync::RunBarrier;

/// End-of-stream word, enqueued once per (producer, consumer) ring after the
/// producer's last payload. Reserved: no packed payload may equal it (feeding
/// a key stream that packs to this word is undefined behavior of the wire
/// format, caught by a debug assertion in the router).
pub const SENTINEL: u64 = 0xD221_A6BE_96E0_4673;
