//! Run lifecycle: allocate, spawn, pin, gate, drain, join, report.
//!
//! The controller owns every shared allocation (queue matrix, barrier,
//! partitions-in-waiting) and lends them to worker threads through
//! `thread::scope`, so nothing is freed before the last join. It never
//! touches producer/consumer hot data while the run is in flight; after the
//! scope closes it assembles the [`RunReport`] from what the workers hand
//! back.

use std::panic;
use std::path::PathBuf;
use std::thread::{self, ScopedJoinHandle};

use core_affinity::CoreId;
use quanta::Clock;
use tracing::{error, info, warn};

use ringfan_table::{pack_key, CountTable, KeyRecord, ProbeTable, ValueRecord};

use crate::config::{Config, Pinning, RunMode};
use crate::error::FabricError;
use crate::generator::{materialize_zipf, KeyStream, SequentialKeys, Xorwow, ZipfianKeys};
use crate::matrix::QueueMatrix;
use crate::pipeline::{ConsumerPipeline, CONS_BATCH};
use crate::router::PartitionRouter;
use crate::shard::{RunReport, Shard, ShardRole, ThreadStats};
use crate::sync::RunBarrier;

/// CPUs held back from workers: the controller itself.
const RESERVED_CPUS: usize = 1;

/// Zipf samples span `[1, 2^63]`; keys stay clear of the sign bit.
const ZIPF_KEY_BITS: u32 = 63;

/// Entry point for driving a configured run to completion.
pub struct Controller;

impl Controller {
    /// Validates the configuration, plans thread placement, and drives the
    /// configured mode to completion.
    pub fn run(cfg: Config) -> Result<RunReport, FabricError> {
        cfg.validate()?;
        let plan = plan_affinity(&cfg)?;
        if let Some(core) = plan.controller {
            pin_current("controller", core);
        }

        info!(
            mode = ?cfg.mode,
            n_prod = cfg.n_prod,
            n_cons = cfg.n_cons,
            num_inserts = cfg.num_inserts,
            "controller starting"
        );

        match cfg.mode {
            RunMode::Fanout => run_fanout(&cfg, &plan),
            RunMode::Direct => run_direct(&cfg, &plan),
            RunMode::Zipfian => run_zipfian(&cfg, &plan),
            RunMode::DryRun => run_dry(&cfg, &plan),
        }
    }
}

// ---------------------------------------------------------------------------
// Thread placement
// ---------------------------------------------------------------------------

struct AffinityPlan {
    producers: Vec<Option<CoreId>>,
    consumers: Vec<Option<CoreId>>,
    controller: Option<CoreId>,
}

impl AffinityPlan {
    fn unpinned(n_prod: usize, n_cons: usize) -> Self {
        Self {
            producers: vec![None; n_prod],
            consumers: vec![None; n_cons],
            controller: None,
        }
    }
}

fn plan_affinity(cfg: &Config) -> Result<AffinityPlan, FabricError> {
    let needed = cfg.n_prod + cfg.n_cons;
    match &cfg.pinning {
        Pinning::None => Ok(AffinityPlan::unpinned(cfg.n_prod, cfg.n_cons)),

        Pinning::Assigned {
            producers,
            consumers,
        } => {
            // The worker lists are explicit; the controller takes the first
            // enumerated core outside them.
            let assigned: Vec<usize> = producers.iter().chain(consumers).copied().collect();
            let controller = core_affinity::get_core_ids()
                .and_then(|cores| cores.into_iter().find(|c| !assigned.contains(&c.id)));
            Ok(AffinityPlan {
                producers: producers.iter().map(|&id| Some(CoreId { id })).collect(),
                consumers: consumers.iter().map(|&id| Some(CoreId { id })).collect(),
                controller,
            })
        }

        Pinning::Auto => {
            let cores = core_affinity::get_core_ids().ok_or(FabricError::CpuEnumeration)?;
            if cores.len() < needed + RESERVED_CPUS {
                return Err(FabricError::InsufficientCpus {
                    needed,
                    available: cores.len(),
                    reserved: RESERVED_CPUS,
                });
            }
            let producers = cores[..cfg.n_prod].iter().map(|&c| Some(c)).collect();
            let consumers = cores[cfg.n_prod..needed].iter().map(|&c| Some(c)).collect();
            let controller = Some(cores[cores.len() - 1]);
            Ok(AffinityPlan {
                producers,
                consumers,
                controller,
            })
        }
    }
}

fn pin_current(who: &str, core: CoreId) {
    if core_affinity::set_for_current(core) {
        info!(thread = who, cpu = core.id, "pinned");
    } else {
        warn!(thread = who, cpu = core.id, "failed to set affinity");
    }
}

fn pin_if_assigned(who: &str, core: Option<CoreId>) {
    if let Some(core) = core {
        pin_current(who, core);
    }
}

/// Re-raises a worker panic on the controller thread.
fn join_worker<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

// ---------------------------------------------------------------------------
// Fanout (canonical mode)
// ---------------------------------------------------------------------------

fn run_fanout(cfg: &Config, plan: &AffinityPlan) -> Result<RunReport, FabricError> {
    let matrix = QueueMatrix::new(cfg.n_prod, cfg.n_cons, cfg.queue_capacity)?;

    // Partitions are built before any thread spawns so construction errors
    // surface on the controller, not as worker panics.
    let tables = (0..cfg.n_cons)
        .map(|_| ProbeTable::with_capacity(cfg.ht_size))
        .collect::<Result<Vec<_>, _>>()?;

    let barrier = RunBarrier::new();
    let clock = Clock::new();
    let messages = cfg.messages_per_producer();

    let report = thread::scope(|s| {
        let mut prod_handles = Vec::with_capacity(cfg.n_prod);
        for p in 0..cfg.n_prod {
            let (matrix, barrier, clock) = (&matrix, &barrier, &clock);
            let core = plan.producers[p];
            prod_handles.push(
                s.spawn(move || producer_body(cfg, matrix, barrier, clock, core, p, messages)),
            );
        }

        let mut cons_handles = Vec::with_capacity(cfg.n_cons);
        for (c, table) in tables.into_iter().enumerate() {
            let (matrix, barrier, clock) = (&matrix, &barrier, &clock);
            let core = plan.consumers[c];
            cons_handles
                .push(s.spawn(move || consumer_body(cfg, matrix, barrier, clock, core, c, table)));
        }

        barrier.wait_ready(cfg.n_prod as u32, cfg.n_cons as u32);
        barrier.open_gate();
        barrier.wait_producers_done(cfg.n_prod as u32);
        barrier.wait_consumers_done(cfg.n_cons as u32);

        let mut shards = Vec::with_capacity(cfg.n_prod + cfg.n_cons);
        for (p, handle) in prod_handles.into_iter().enumerate() {
            shards.push(Shard {
                shard_idx: p as u32,
                role: ShardRole::Producer,
                stats: join_worker(handle),
            });
        }
        let mut partitions = Vec::with_capacity(cfg.n_cons);
        for (c, handle) in cons_handles.into_iter().enumerate() {
            let (stats, table) = join_worker(handle);
            shards.push(Shard {
                shard_idx: (cfg.n_prod + c) as u32,
                role: ShardRole::Consumer,
                stats,
            });
            partitions.push(table);
        }
        RunReport { shards, partitions }
    });

    Ok(report)
}

fn make_source(cfg: &Config, shard: usize, span: u64) -> Box<dyn KeyStream> {
    if cfg.xorwow_keys {
        Box::new(Xorwow::new(cfg.seed ^ (shard as u64).wrapping_mul(0x9E37_79B9)))
    } else {
        Box::new(SequentialKeys::starting_at(span * shard as u64))
    }
}

fn producer_body(
    cfg: &Config,
    matrix: &QueueMatrix,
    barrier: &RunBarrier,
    clock: &Clock,
    core: Option<CoreId>,
    p: usize,
    messages: u64,
) -> ThreadStats {
    pin_if_assigned("producer", core);
    let mut router = PartitionRouter::new(matrix.producer_row(p));
    info!(
        producer = p,
        messages,
        replays = cfg.insert_factor,
        "producer starting"
    );

    barrier.producer_ready();
    let start = clock.raw();

    for _ in 0..cfg.insert_factor {
        // Each replay rebuilds the source, so every pass routes the same keys.
        let mut source = make_source(cfg, p, messages);
        for _ in 0..messages {
            router.route(source.next_key());
        }
    }
    router.finish();

    let end = clock.raw();
    let stats = ThreadStats {
        insertion_cycles: end.wrapping_sub(start),
        num_inserts: router.routed(),
        num_enq_failures: router.num_enq_failures(),
        ..ThreadStats::default()
    };
    barrier.producer_done();
    stats
}

fn consumer_body(
    cfg: &Config,
    matrix: &QueueMatrix,
    barrier: &RunBarrier,
    clock: &Clock,
    core: Option<CoreId>,
    c: usize,
    table: ProbeTable,
) -> (ThreadStats, ProbeTable) {
    pin_if_assigned("consumer", core);
    let shard_idx = (cfg.n_prod + c) as u32;
    let pipeline = ConsumerPipeline::new(
        matrix.consumer_column(c),
        table,
        cfg.no_prefetch,
        cfg.num_nops,
    );
    info!(consumer = c, "consumer starting");

    barrier.consumer_ready();
    let start = clock.raw();
    let (table, summary) = pipeline.run();
    let end = clock.raw();

    dump_partition(cfg, shard_idx, &table);

    let stats = ThreadStats {
        insertion_cycles: end.wrapping_sub(start),
        num_inserts: summary.num_inserts,
        num_deq_failures: summary.num_deq_failures,
        ..partition_stats(&table)
    };
    barrier.consumer_done();
    (stats, table)
}

fn partition_stats(table: &ProbeTable) -> ThreadStats {
    ThreadStats {
        ht_fill: table.fill() as u64,
        ht_capacity: table.capacity() as u64,
        num_reprobes: table.num_reprobes(),
        num_soft_reprobes: table.num_soft_reprobes(),
        ..ThreadStats::default()
    }
}

fn dump_partition(cfg: &Config, shard_idx: u32, table: &ProbeTable) {
    let Some(prefix) = &cfg.ht_file else { return };
    let path = PathBuf::from(format!("{}{}", prefix.display(), shard_idx));
    match table.print_to_file(&path) {
        Ok(()) => info!(shard = shard_idx, path = %path.display(), "partition dumped"),
        Err(e) => error!(shard = shard_idx, error = %e, "partition dump failed"),
    }
}

// ---------------------------------------------------------------------------
// Direct mode (no fabric)
// ---------------------------------------------------------------------------

fn run_direct(cfg: &Config, plan: &AffinityPlan) -> Result<RunReport, FabricError> {
    let tables = (0..cfg.n_cons)
        .map(|_| ProbeTable::with_capacity(cfg.ht_size))
        .collect::<Result<Vec<_>, _>>()?;
    let barrier = RunBarrier::new();
    let clock = Clock::new();

    let report = thread::scope(|s| {
        let mut handles = Vec::with_capacity(cfg.n_cons);
        for (idx, table) in tables.into_iter().enumerate() {
            let (barrier, clock) = (&barrier, &clock);
            let core = plan.consumers[idx];
            handles.push(s.spawn(move || direct_body(cfg, barrier, clock, core, idx, table)));
        }

        barrier.wait_ready(0, cfg.n_cons as u32);
        barrier.open_gate();
        barrier.wait_consumers_done(cfg.n_cons as u32);

        collect_workers(handles)
    });
    Ok(report)
}

fn direct_body(
    cfg: &Config,
    barrier: &RunBarrier,
    clock: &Clock,
    core: Option<CoreId>,
    idx: usize,
    mut table: ProbeTable,
) -> (ThreadStats, ProbeTable) {
    pin_if_assigned("direct", core);
    info!(shard = idx, inserts = cfg.num_inserts, "direct worker starting");

    barrier.consumer_ready();
    let start = clock.raw();

    let mut staged = [KeyRecord::default(); CONS_BATCH];
    let mut fill = 0;
    let mut inserted = 0u64;
    for _ in 0..cfg.insert_factor {
        let mut source = make_source(cfg, idx, cfg.num_inserts);
        for _ in 0..cfg.num_inserts {
            let rec = KeyRecord::packed(pack_key(source.next_key()));
            inserted += 1;
            if cfg.no_prefetch {
                table.insert_noprefetch(&rec);
                continue;
            }
            staged[fill] = rec;
            fill += 1;
            if fill == CONS_BATCH {
                table.insert_batch(&staged);
                fill = 0;
            }
        }
    }
    if fill > 0 {
        table.insert_batch(&staged[..fill]);
    }
    table.flush_insert_queue();

    let end = clock.raw();
    dump_partition(cfg, idx as u32, &table);
    let stats = ThreadStats {
        insertion_cycles: end.wrapping_sub(start),
        num_inserts: inserted,
        ..partition_stats(&table)
    };
    barrier.consumer_done();
    (stats, table)
}

// ---------------------------------------------------------------------------
// Zipfian mode (insert phase, then find phase)
// ---------------------------------------------------------------------------

fn run_zipfian(cfg: &Config, plan: &AffinityPlan) -> Result<RunReport, FabricError> {
    let tables = (0..cfg.n_cons)
        .map(|_| ProbeTable::with_capacity(cfg.ht_size))
        .collect::<Result<Vec<_>, _>>()?;
    let barrier = RunBarrier::new();
    let clock = Clock::new();

    // One shared stream, materialized once; each worker walks its own slice
    // of the index space.
    let total = cfg.n_cons * cfg.num_inserts as usize;
    info!(samples = total, skew = cfg.skew, "materializing zipf stream");
    let values = materialize_zipf(total.max(1), cfg.skew, ZIPF_KEY_BITS, cfg.seed);

    let report = thread::scope(|s| {
        let mut handles = Vec::with_capacity(cfg.n_cons);
        for (idx, table) in tables.into_iter().enumerate() {
            let (barrier, clock, values) = (&barrier, &clock, &values);
            let core = plan.consumers[idx];
            handles
                .push(s.spawn(move || zipfian_body(cfg, barrier, clock, core, idx, table, values)));
        }

        barrier.wait_ready(0, cfg.n_cons as u32);
        barrier.open_gate();
        barrier.wait_consumers_done(cfg.n_cons as u32);

        collect_workers(handles)
    });
    Ok(report)
}

fn zipfian_body(
    cfg: &Config,
    barrier: &RunBarrier,
    clock: &Clock,
    core: Option<CoreId>,
    idx: usize,
    mut table: ProbeTable,
    values: &[u64],
) -> (ThreadStats, ProbeTable) {
    pin_if_assigned("zipfian", core);
    let span = cfg.num_inserts as usize;
    info!(shard = idx, inserts = span, "zipfian worker starting");

    barrier.consumer_ready();

    // Insert phase.
    let insert_start = clock.raw();
    let mut staged = [KeyRecord::default(); CONS_BATCH];
    let mut fill = 0;
    let mut inserted = 0u64;
    for _ in 0..cfg.insert_factor {
        let mut source = ZipfianKeys::new(values, idx * span);
        for _ in 0..span {
            let rec = KeyRecord::packed(pack_key(source.next_key()));
            inserted += 1;
            if cfg.no_prefetch {
                table.insert_noprefetch(&rec);
                continue;
            }
            staged[fill] = rec;
            fill += 1;
            if fill == CONS_BATCH {
                table.insert_batch(&staged);
                fill = 0;
            }
        }
    }
    if fill > 0 {
        table.insert_batch(&staged[..fill]);
        fill = 0;
    }
    table.flush_insert_queue();
    let insert_end = clock.raw();

    // Find phase over the same stream.
    let mut hits: Vec<ValueRecord> = Vec::with_capacity(CONS_BATCH);
    let mut found = 0u64;
    let find_start = clock.raw();
    for _ in 0..cfg.insert_factor {
        let mut source = ZipfianKeys::new(values, idx * span);
        for n in 0..span {
            if cfg.no_prefetch {
                let rec = KeyRecord::from_raw(source.next_key(), n as u64);
                if table.find_noprefetch(&rec).is_some() {
                    found += 1;
                }
                continue;
            }
            staged[fill] = KeyRecord::from_raw(source.next_key(), n as u64);
            fill += 1;
            if fill == CONS_BATCH {
                table.find_batch(&staged, &mut hits);
                found += hits.len() as u64;
                hits.clear();
                fill = 0;
            }
        }
    }
    if fill > 0 {
        table.find_batch(&staged[..fill], &mut hits);
    }
    table.flush_find_queue(&mut hits);
    found += hits.len() as u64;
    let find_end = clock.raw();

    dump_partition(cfg, idx as u32, &table);
    let stats = ThreadStats {
        insertion_cycles: insert_end.wrapping_sub(insert_start),
        num_inserts: inserted,
        find_cycles: find_end.wrapping_sub(find_start),
        num_finds: found,
        ..partition_stats(&table)
    };
    barrier.consumer_done();
    (stats, table)
}

// ---------------------------------------------------------------------------
// Dry run (generation only)
// ---------------------------------------------------------------------------

fn run_dry(cfg: &Config, plan: &AffinityPlan) -> Result<RunReport, FabricError> {
    let barrier = RunBarrier::new();
    let clock = Clock::new();

    let report = thread::scope(|s| {
        let mut handles = Vec::with_capacity(cfg.n_cons);
        for idx in 0..cfg.n_cons {
            let (barrier, clock) = (&barrier, &clock);
            let core = plan.consumers[idx];
            handles.push(s.spawn(move || {
                pin_if_assigned("dry", core);
                barrier.consumer_ready();
                let start = clock.raw();
                for _ in 0..cfg.insert_factor {
                    let mut source = make_source(cfg, idx, cfg.num_inserts);
                    for _ in 0..cfg.num_inserts {
                        std::hint::black_box(source.next_key());
                    }
                }
                let end = clock.raw();
                let stats = ThreadStats {
                    insertion_cycles: end.wrapping_sub(start),
                    ..ThreadStats::default()
                };
                barrier.consumer_done();
                stats
            }));
        }

        barrier.wait_ready(0, cfg.n_cons as u32);
        barrier.open_gate();
        barrier.wait_consumers_done(cfg.n_cons as u32);

        let shards = handles
            .into_iter()
            .enumerate()
            .map(|(idx, handle)| Shard {
                shard_idx: idx as u32,
                role: ShardRole::Consumer,
                stats: join_worker(handle),
            })
            .collect();
        RunReport {
            shards,
            partitions: Vec::new(),
        }
    });
    Ok(report)
}

/// Joins fabric-less workers into a report (Direct and Zipfian modes).
fn collect_workers(handles: Vec<ScopedJoinHandle<'_, (ThreadStats, ProbeTable)>>) -> RunReport {
    let mut shards = Vec::with_capacity(handles.len());
    let mut partitions = Vec::with_capacity(handles.len());
    for (idx, handle) in handles.into_iter().enumerate() {
        let (stats, table) = join_worker(handle);
        shards.push(Shard {
            shard_idx: idx as u32,
            role: ShardRole::Consumer,
            stats,
        });
        partitions.push(table);
    }
    RunReport { shards, partitions }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_run_conserves_messages() {
        let report = Controller::run(Config::smoke()).unwrap();
        assert_eq!(report.producer_messages(), 1024);
        assert_eq!(report.consumer_inserts(), 1024);
        assert_eq!(report.partitions.len(), 1);
        assert_eq!(report.partitions[0].fill(), 1024);
    }

    #[test]
    fn direct_mode_fills_every_partition() {
        let cfg = Config::smoke()
            .with_shards(1, 2)
            .with_num_inserts(512)
            .with_mode(RunMode::Direct);
        let report = Controller::run(cfg).unwrap();
        assert_eq!(report.consumer_inserts(), 1024);
        for partition in &report.partitions {
            assert_eq!(partition.fill(), 512);
        }
    }

    #[test]
    fn dry_run_touches_no_partition() {
        let cfg = Config::smoke().with_mode(RunMode::DryRun);
        let report = Controller::run(cfg).unwrap();
        assert!(report.partitions.is_empty());
        assert_eq!(report.consumer_inserts(), 0);
    }
}
