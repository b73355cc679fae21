//! Run configuration.

use std::path::PathBuf;

use crate::error::FabricError;

/// Which workload the controller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Producers route keys through the ring fabric to consumers (canonical).
    Fanout,
    /// No fabric: each worker feeds its own partition directly.
    Direct,
    /// No fabric: per-worker insert phase then find phase over a
    /// pre-materialized Zipf stream.
    Zipfian,
    /// Key generation only; nothing is inserted.
    DryRun,
}

/// Thread-to-core placement policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pinning {
    /// Explicit CPU lists, one entry per producer / consumer shard.
    Assigned {
        producers: Vec<usize>,
        consumers: Vec<usize>,
    },
    /// Derive lists from the enumerated cores, reserving one for the
    /// controller.
    Auto,
    /// No affinity at all (small hosts, CI).
    None,
}

/// Read-only description of one run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Producer shard count.
    pub n_prod: usize,
    /// Consumer shard count (= partition count).
    pub n_cons: usize,
    /// Insert target per partition; each producer routes
    /// `num_inserts * n_cons / n_prod` payloads.
    pub num_inserts: u64,
    /// Ring capacity in slots (power of two).
    pub queue_capacity: usize,
    /// Partition capacity in slots (power of two).
    pub ht_size: usize,
    pub mode: RunMode,
    /// Times the whole key stream is replayed.
    pub insert_factor: u32,
    /// Zipf exponent for `RunMode::Zipfian`.
    pub skew: f64,
    /// Use the scalar no-pipeline insert path.
    pub no_prefetch: bool,
    /// Artificial per-record delay, in pause hints.
    pub num_nops: u32,
    /// When set, each consumer dumps its partition to `"{ht_file}{shard_idx}"`.
    pub ht_file: Option<PathBuf>,
    /// Draw keys from xorwow instead of the dense counter.
    pub xorwow_keys: bool,
    /// Seed for xorwow and Zipf materialization.
    pub seed: u64,
    pub pinning: Pinning,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            n_prod: 1,
            n_cons: 1,
            num_inserts: 1 << 20,
            queue_capacity: 1024,
            ht_size: 1 << 22,
            mode: RunMode::Fanout,
            insert_factor: 1,
            skew: 0.99,
            no_prefetch: false,
            num_nops: 0,
            ht_file: None,
            xorwow_keys: false,
            seed: 0xC0FF_EE11,
            pinning: Pinning::Auto,
        }
    }
}

impl Config {
    /// Tiny unpinned single-pair run; handy for tests and benches.
    pub fn smoke() -> Self {
        Self {
            num_inserts: 1024,
            queue_capacity: 256,
            ht_size: 1 << 12,
            pinning: Pinning::None,
            ..Self::default()
        }
    }

    pub fn with_shards(mut self, n_prod: usize, n_cons: usize) -> Self {
        self.n_prod = n_prod;
        self.n_cons = n_cons;
        self
    }

    pub fn with_num_inserts(mut self, num_inserts: u64) -> Self {
        self.num_inserts = num_inserts;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_ht_size(mut self, ht_size: usize) -> Self {
        self.ht_size = ht_size;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_insert_factor(mut self, insert_factor: u32) -> Self {
        self.insert_factor = insert_factor;
        self
    }

    pub fn with_skew(mut self, skew: f64) -> Self {
        self.skew = skew;
        self
    }

    pub fn with_no_prefetch(mut self, no_prefetch: bool) -> Self {
        self.no_prefetch = no_prefetch;
        self
    }

    pub fn with_num_nops(mut self, num_nops: u32) -> Self {
        self.num_nops = num_nops;
        self
    }

    pub fn with_ht_file(mut self, prefix: PathBuf) -> Self {
        self.ht_file = Some(prefix);
        self
    }

    pub fn with_xorwow_keys(mut self, xorwow: bool) -> Self {
        self.xorwow_keys = xorwow;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_pinning(mut self, pinning: Pinning) -> Self {
        self.pinning = pinning;
        self
    }

    /// Payloads each producer routes per replay:
    /// `round(num_inserts * n_cons / n_prod)`.
    pub fn messages_per_producer(&self) -> u64 {
        (self.num_inserts as f64 * self.n_cons as f64 / self.n_prod as f64).round() as u64
    }

    /// Rejects configurations that would fail after threads were spawned.
    /// (The CPU budget is checked by the controller, which knows the host.)
    pub fn validate(&self) -> Result<(), FabricError> {
        if self.n_prod == 0 || self.n_cons == 0 {
            return Err(FabricError::ZeroShards {
                n_prod: self.n_prod,
                n_cons: self.n_cons,
            });
        }
        if self.queue_capacity == 0 || !self.queue_capacity.is_power_of_two() {
            return Err(FabricError::CapacityNotPowerOfTwo {
                got: self.queue_capacity,
            });
        }
        if self.ht_size == 0 || !self.ht_size.is_power_of_two() {
            return Err(ringfan_table::TableError::CapacityNotPowerOfTwo { got: self.ht_size }.into());
        }
        if self.insert_factor == 0 {
            return Err(FabricError::ZeroInsertFactor);
        }
        if let Pinning::Assigned {
            producers,
            consumers,
        } = &self.pinning
        {
            if producers.len() != self.n_prod {
                return Err(FabricError::BadCpuList {
                    side: "producer",
                    need: self.n_prod,
                    got: producers.len(),
                });
            }
            if consumers.len() != self.n_cons {
                return Err(FabricError::BadCpuList {
                    side: "consumer",
                    need: self.n_cons,
                    got: consumers.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::smoke().validate().is_ok());
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(Config::default().with_shards(0, 1).validate().is_err());
        assert!(Config::default().with_queue_capacity(12).validate().is_err());
        assert!(Config::default().with_ht_size(100).validate().is_err());
        assert!(Config::default().with_insert_factor(0).validate().is_err());
    }

    #[test]
    fn rejects_mismatched_cpu_lists() {
        let cfg = Config::default().with_shards(2, 1).with_pinning(Pinning::Assigned {
            producers: vec![0],
            consumers: vec![1],
        });
        assert!(matches!(
            cfg.validate(),
            Err(FabricError::BadCpuList { side: "producer", .. })
        ));
    }

    #[test]
    fn messages_per_producer_scales_with_the_fabric() {
        let cfg = Config::default().with_shards(2, 4).with_num_inserts(1000);
        // 1000 * 4 / 2
        assert_eq!(cfg.messages_per_producer(), 2000);

        let cfg = Config::default().with_shards(3, 1).with_num_inserts(1000);
        assert_eq!(cfg.messages_per_producer(), 333);
    }
}
