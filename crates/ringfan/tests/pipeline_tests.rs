//! End-to-end runs of the controller over small fabrics.
//!
//! Pinning is disabled throughout so the suite runs on any host; everything
//! else goes through the same code paths as a full-size run.

use std::path::PathBuf;

use ringfan::{Config, Controller, FabricError, Pinning, RunMode, RunReport, ShardRole};
use ringfan_table::{pack_key, CountTable, KeyRecord};

/// Aggregated count of `key` across every partition of a finished run.
fn total_count(report: &mut RunReport, key: u64) -> u64 {
    let rec = KeyRecord::packed(pack_key(key));
    report
        .partitions
        .iter_mut()
        .filter_map(|t| t.find_noprefetch(&rec))
        .map(|v| v.value)
        .sum()
}

fn consumer_inserts_per_shard(report: &RunReport) -> Vec<u64> {
    report
        .shards
        .iter()
        .filter(|s| s.role == ShardRole::Consumer)
        .map(|s| s.stats.num_inserts)
        .collect()
}

#[test]
fn smoke_single_pair() {
    // One producer, one consumer, keys 1..=1024 through a 256-slot ring.
    let mut report = Controller::run(Config::smoke()).unwrap();

    assert_eq!(report.producer_messages(), 1024);
    assert_eq!(report.consumer_inserts(), 1024);
    assert_eq!(report.partitions[0].fill(), 1024);
    for key in 1..=1024u64 {
        assert_eq!(total_count(&mut report, key), 1, "key {key}");
    }
}

#[test]
fn fan_out_routes_each_key_to_its_residue_class() {
    // One producer spraying 1024 dense keys across four consumers.
    let cfg = Config::smoke().with_shards(1, 4).with_num_inserts(256);
    assert_eq!(cfg.messages_per_producer(), 1024);
    let mut report = Controller::run(cfg).unwrap();

    assert_eq!(report.consumer_inserts(), 1024);
    // Dense keys spread evenly: every consumer got exactly its share.
    assert_eq!(consumer_inserts_per_shard(&report), vec![256; 4]);

    // A key lives only in the partition owning its residue class.
    for key in 1..=1024u64 {
        let rec = KeyRecord::packed(pack_key(key));
        for (c, table) in report.partitions.iter_mut().enumerate() {
            let hit = table.find_noprefetch(&rec);
            if c as u64 == key % 4 {
                assert_eq!(hit.unwrap().value, 1);
            } else {
                assert!(hit.is_none(), "key {key} leaked into partition {c}");
            }
        }
    }
}

#[test]
fn fan_in_merges_four_producers_into_one_partition() {
    // Four producers, 256 messages each, one consumer.
    let cfg = Config::smoke().with_shards(4, 1).with_num_inserts(1024);
    assert_eq!(cfg.messages_per_producer(), 256);
    let mut report = Controller::run(cfg).unwrap();

    assert_eq!(report.producer_messages(), 1024);
    assert_eq!(report.consumer_inserts(), 1024);

    // Producer 0's range start is clamped from 0 to 1, so its last key (256)
    // collides with producer 1's first. Everything else is unique.
    assert_eq!(report.partitions[0].fill(), 1023);
    assert_eq!(total_count(&mut report, 256), 2);
    assert_eq!(total_count(&mut report, 1), 1);
    assert_eq!(total_count(&mut report, 512), 1);
    assert_eq!(total_count(&mut report, 1023), 1);
}

#[test]
fn insert_factor_multiplies_every_count() {
    let cfg = Config::smoke().with_insert_factor(3);
    let mut report = Controller::run(cfg).unwrap();

    assert_eq!(report.consumer_inserts(), 3 * 1024);
    for key in 1..=1024u64 {
        assert_eq!(total_count(&mut report, key), 3);
    }
}

#[test]
fn tiny_rings_stress_the_full_path_without_loss() {
    // 16-slot rings force constant enqueue-full retries.
    let cfg = Config::default()
        .with_shards(2, 2)
        .with_num_inserts(50_000)
        .with_queue_capacity(16)
        .with_ht_size(1 << 18)
        .with_pinning(Pinning::None);
    let report = Controller::run(cfg).unwrap();

    assert_eq!(report.producer_messages(), 100_000);
    assert_eq!(report.consumer_inserts(), 100_000);
    assert!(
        report.total_enq_failures() > 0,
        "16-slot rings should see full-ring retries"
    );
}

#[test]
fn zero_messages_still_terminates_cleanly() {
    let cfg = Config::smoke().with_shards(2, 2).with_num_inserts(0);
    let report = Controller::run(cfg).unwrap();

    assert_eq!(report.producer_messages(), 0);
    assert_eq!(report.consumer_inserts(), 0);
    for partition in &report.partitions {
        assert_eq!(partition.fill(), 0);
    }
}

#[test]
fn no_prefetch_path_reaches_the_same_state() {
    let mut batched = Controller::run(Config::smoke()).unwrap();
    let mut scalar = Controller::run(Config::smoke().with_no_prefetch(true)).unwrap();

    assert_eq!(batched.consumer_inserts(), scalar.consumer_inserts());
    assert_eq!(batched.partitions[0].fill(), scalar.partitions[0].fill());
    for key in 1..=1024u64 {
        assert_eq!(
            total_count(&mut batched, key),
            total_count(&mut scalar, key)
        );
    }
}

#[test]
fn num_nops_slows_but_conserves() {
    let cfg = Config::smoke().with_num_nops(16);
    let report = Controller::run(cfg).unwrap();
    assert_eq!(report.consumer_inserts(), 1024);
}

#[test]
fn xorwow_keys_are_conserved_and_dumpable() {
    let prefix = std::env::temp_dir().join(format!("ringfan_dump_{}_", std::process::id()));
    let cfg = Config::smoke()
        .with_shards(2, 2)
        .with_num_inserts(500)
        .with_xorwow_keys(true)
        .with_ht_file(prefix.clone());
    let report = Controller::run(cfg).unwrap();

    // 500 inserts per partition, two partitions.
    assert_eq!(report.producer_messages(), 1000);
    assert_eq!(report.consumer_inserts(), 1000);

    // Each consumer wrote "{prefix}{shard_idx}"; summed multiplicities must
    // equal the insert total even with random (possibly colliding) keys.
    let mut dumped = 0u64;
    for shard_idx in 2..4 {
        let path = PathBuf::from(format!("{}{}", prefix.display(), shard_idx));
        let dump = std::fs::read_to_string(&path).unwrap();
        for line in dump.lines() {
            dumped += line.split_whitespace().nth(1).unwrap().parse::<u64>().unwrap();
        }
        std::fs::remove_file(&path).unwrap();
    }
    assert_eq!(dumped, 1000);
}

#[test]
fn direct_mode_matches_fanout_totals() {
    let cfg = Config::smoke()
        .with_shards(1, 2)
        .with_num_inserts(600)
        .with_mode(RunMode::Direct);
    let report = Controller::run(cfg).unwrap();

    assert_eq!(report.consumer_inserts(), 1200);
    for partition in &report.partitions {
        assert_eq!(partition.fill(), 600);
    }
}

#[test]
fn zipfian_mode_finds_everything_it_inserted() {
    let cfg = Config::smoke()
        .with_shards(1, 2)
        .with_num_inserts(2000)
        .with_ht_size(1 << 13)
        .with_mode(RunMode::Zipfian)
        .with_skew(1.01);
    let report = Controller::run(cfg).unwrap();

    assert_eq!(report.consumer_inserts(), 4000);
    let finds: u64 = report
        .shards
        .iter()
        .map(|s| s.stats.num_finds)
        .sum();
    // Every key queried in the find phase was inserted in the insert phase.
    assert_eq!(finds, 4000);

    // Multiplicities across a partition sum to what that worker inserted.
    for shard in &report.shards {
        assert!(shard.stats.num_inserts >= shard.stats.ht_fill);
    }
}

#[test]
fn zipfian_replays_scale_counts_and_finds() {
    let cfg = Config::smoke()
        .with_shards(1, 1)
        .with_num_inserts(1000)
        .with_ht_size(1 << 12)
        .with_mode(RunMode::Zipfian)
        .with_insert_factor(2);
    let report = Controller::run(cfg).unwrap();

    assert_eq!(report.consumer_inserts(), 2000);
    assert_eq!(report.shards[0].stats.num_finds, 2000);
}

#[test]
fn misconfiguration_fails_before_spawning() {
    assert!(matches!(
        Controller::run(Config::smoke().with_queue_capacity(100)),
        Err(FabricError::CapacityNotPowerOfTwo { got: 100 })
    ));

    let bad_lists = Config::smoke().with_shards(2, 2).with_pinning(Pinning::Assigned {
        producers: vec![0],
        consumers: vec![1, 2],
    });
    assert!(matches!(
        Controller::run(bad_lists),
        Err(FabricError::BadCpuList { .. })
    ));
}

#[test]
fn absurd_shard_counts_exceed_any_host() {
    let cfg = Config::smoke().with_shards(4096, 4096).with_num_inserts(1);
    match Controller::run(cfg.with_pinning(Pinning::Auto)) {
        Err(FabricError::InsufficientCpus { needed, .. }) => assert_eq!(needed, 8192),
        Err(FabricError::CpuEnumeration) => {} // host cannot enumerate cores at all
        Err(other) => panic!("expected a CPU budget failure, got {other}"),
        Ok(_) => panic!("8192 shards should not fit any host"),
    }
}
