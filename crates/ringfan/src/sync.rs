//! Ready/start/complete barrier binding workers to the controller.
//!
//! Every worker increments its ready counter and spins on the start gate;
//! the controller opens the gate only after *all* workers are ready, so the
//! per-thread timing snapshots taken right after the gate fall within a
//! small bounded window, the precondition for comparing cycles-per-message
//! across threads. Completion mirrors the entry: workers bump a completed
//! counter, the controller waits for both counts.
//!
//! The counters are off the data path; plain sequential consistency keeps
//! the reasoning trivial. Each cell is cache-padded so the spinning sides
//! never false-share.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

use crate::backoff::Backoff;

/// Shared barrier state for one run.
#[derive(Debug, Default)]
pub struct RunBarrier {
    ready_producers: CachePadded<AtomicU32>,
    ready_consumers: CachePadded<AtomicU32>,
    completed_producers: CachePadded<AtomicU32>,
    completed_consumers: CachePadded<AtomicU32>,
    start_gate: CachePadded<AtomicBool>,
}

impl RunBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    // --- worker side ---------------------------------------------------

    /// Announces a ready producer, then spins until the gate opens.
    pub fn producer_ready(&self) {
        self.ready_producers.fetch_add(1, Ordering::SeqCst);
        self.await_start();
    }

    /// Announces a ready consumer, then spins until the gate opens.
    pub fn consumer_ready(&self) {
        self.ready_consumers.fetch_add(1, Ordering::SeqCst);
        self.await_start();
    }

    fn await_start(&self) {
        while !self.start_gate.load(Ordering::SeqCst) {
            hint::spin_loop();
        }
    }

    /// A producer has emitted its last sentinel.
    pub fn producer_done(&self) {
        self.completed_producers.fetch_add(1, Ordering::SeqCst);
    }

    /// A consumer has drained its column and flushed its partition.
    pub fn consumer_done(&self) {
        self.completed_consumers.fetch_add(1, Ordering::SeqCst);
    }

    // --- controller side ------------------------------------------------

    /// Waits until every worker has checked in.
    pub fn wait_ready(&self, n_prod: u32, n_cons: u32) {
        Backoff::wait_until(|| {
            self.ready_producers.load(Ordering::SeqCst) >= n_prod
                && self.ready_consumers.load(Ordering::SeqCst) >= n_cons
        });
    }

    /// Opens the start gate. Workers blocked in `*_ready` proceed.
    pub fn open_gate(&self) {
        self.start_gate.store(true, Ordering::SeqCst);
    }

    /// Waits for all producers to finish.
    pub fn wait_producers_done(&self, n_prod: u32) {
        Backoff::wait_until(|| self.completed_producers.load(Ordering::SeqCst) >= n_prod);
    }

    /// Waits for all consumers to finish.
    pub fn wait_consumers_done(&self, n_cons: u32) {
        Backoff::wait_until(|| self.completed_consumers.load(Ordering::SeqCst) >= n_cons);
    }
}
