//! CLI driver for the aggregation engine.
//!
//! ```text
//! fanout --n-prod 4 --n-cons 4 --num-inserts 16777216
//! fanout --mode zipfian --skew 1.1 --insert-factor 2
//! RUST_LOG=debug fanout --queue-capacity 64 --no-pin
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use ringfan::{Config, Controller, Pinning, RunMode};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Producers route keys through the ring fabric to consumers.
    Fanout,
    /// No fabric: workers feed their partitions directly.
    Direct,
    /// Insert phase then find phase over a Zipf stream.
    Zipfian,
    /// Key generation only.
    DryRun,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Fanout => RunMode::Fanout,
            ModeArg::Direct => RunMode::Direct,
            ModeArg::Zipfian => RunMode::Zipfian,
            ModeArg::DryRun => RunMode::DryRun,
        }
    }
}

/// Partitioned key aggregation over an SPSC fan-out fabric.
#[derive(Parser, Debug)]
#[command(name = "fanout", version, about)]
struct Args {
    /// Producer shard count.
    #[arg(long, default_value_t = 1)]
    n_prod: usize,

    /// Consumer shard count (= partition count).
    #[arg(long, default_value_t = 1)]
    n_cons: usize,

    /// Insert target per partition.
    #[arg(long, default_value_t = 1 << 20)]
    num_inserts: u64,

    /// Ring capacity in slots (power of two).
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// Partition capacity in slots (power of two).
    #[arg(long, default_value_t = 1 << 22)]
    ht_size: usize,

    #[arg(long, value_enum, default_value_t = ModeArg::Fanout)]
    mode: ModeArg,

    /// Times the whole key stream is replayed.
    #[arg(long, default_value_t = 1)]
    insert_factor: u32,

    /// Zipf exponent (zipfian mode).
    #[arg(long, default_value_t = 0.99)]
    skew: f64,

    /// Use the scalar no-pipeline insert path.
    #[arg(long)]
    no_prefetch: bool,

    /// Artificial per-record delay, in pause hints.
    #[arg(long, default_value_t = 0)]
    num_nops: u32,

    /// Dump each partition to "{prefix}{shard_idx}" after the run.
    #[arg(long)]
    ht_file: Option<PathBuf>,

    /// Draw keys from xorwow instead of the dense counter.
    #[arg(long)]
    xorwow: bool,

    /// Seed for xorwow and Zipf materialization.
    #[arg(long, default_value_t = 0xC0FF_EE11)]
    seed: u64,

    /// Skip CPU pinning (small hosts).
    #[arg(long)]
    no_pin: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::default()
        .with_shards(args.n_prod, args.n_cons)
        .with_num_inserts(args.num_inserts)
        .with_queue_capacity(args.queue_capacity)
        .with_ht_size(args.ht_size)
        .with_mode(args.mode.into())
        .with_insert_factor(args.insert_factor)
        .with_skew(args.skew)
        .with_no_prefetch(args.no_prefetch)
        .with_num_nops(args.num_nops)
        .with_xorwow_keys(args.xorwow)
        .with_seed(args.seed);
    if let Some(prefix) = args.ht_file {
        cfg = cfg.with_ht_file(prefix);
    }
    if args.no_pin {
        cfg = cfg.with_pinning(Pinning::None);
    }

    let report = Controller::run(cfg)?;
    report.summarize();
    Ok(())
}
