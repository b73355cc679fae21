//! Per-thread shard statistics and the aggregated run report.

use std::fmt;

use tracing::info;

/// Statistics owned by one worker thread for the duration of a run. The
/// controller reads them only after every thread has joined.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadStats {
    /// TSC ticks spent between the start gate and completion.
    pub insertion_cycles: u64,
    /// Producer: payloads routed. Consumer: payloads inserted. Sentinels are
    /// counted by neither.
    pub num_inserts: u64,
    pub find_cycles: u64,
    pub num_finds: u64,
    pub num_enq_failures: u64,
    pub num_deq_failures: u64,
    pub ht_fill: u64,
    pub ht_capacity: u64,
    pub num_reprobes: u64,
    pub num_soft_reprobes: u64,
}

/// Which side of the fabric a shard ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRole {
    Producer,
    Consumer,
}

impl fmt::Display for ShardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardRole::Producer => write!(f, "producer"),
            ShardRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// One worker thread's identity and results. Producers are numbered
/// `0..n_prod`, consumers `n_prod..n_prod + n_cons`.
#[derive(Debug, Clone, Copy)]
pub struct Shard {
    pub shard_idx: u32,
    pub role: ShardRole,
    pub stats: ThreadStats,
}

/// Everything a finished run hands back: per-shard statistics plus the
/// consumer-owned partitions (in consumer order).
pub struct RunReport {
    pub shards: Vec<Shard>,
    pub partitions: Vec<ringfan_table::ProbeTable>,
}

impl RunReport {
    /// Total payloads routed by producers.
    pub fn producer_messages(&self) -> u64 {
        self.role_sum(ShardRole::Producer, |s| s.num_inserts)
    }

    /// Total payloads inserted by consumers.
    pub fn consumer_inserts(&self) -> u64 {
        self.role_sum(ShardRole::Consumer, |s| s.num_inserts)
    }

    /// Total failed enqueue attempts across producers.
    pub fn total_enq_failures(&self) -> u64 {
        self.role_sum(ShardRole::Producer, |s| s.num_enq_failures)
    }

    fn role_sum(&self, role: ShardRole, field: impl Fn(&ThreadStats) -> u64) -> u64 {
        self.shards
            .iter()
            .filter(|s| s.role == role)
            .map(|s| field(&s.stats))
            .sum()
    }

    /// Logs the per-shard quick stats and run totals.
    pub fn summarize(&self) {
        for shard in &self.shards {
            let stats = &shard.stats;
            let cycles_per_op = if stats.num_inserts > 0 {
                stats.insertion_cycles / stats.num_inserts
            } else {
                0
            };
            info!(
                shard = shard.shard_idx,
                role = %shard.role,
                num_inserts = stats.num_inserts,
                cycles_per_op,
                enq_failures = stats.num_enq_failures,
                deq_failures = stats.num_deq_failures,
                "shard finished"
            );
            if shard.role == ShardRole::Consumer {
                info!(
                    shard = shard.shard_idx,
                    fill = stats.ht_fill,
                    capacity = stats.ht_capacity,
                    reprobes = stats.num_reprobes,
                    soft_reprobes = stats.num_soft_reprobes,
                    num_finds = stats.num_finds,
                    "partition stats"
                );
            }
        }
        info!(
            routed = self.producer_messages(),
            inserted = self.consumer_inserts(),
            enq_failures = self.total_enq_failures(),
            "run complete"
        );
    }
}
