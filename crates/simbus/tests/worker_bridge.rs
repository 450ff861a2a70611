// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Batching worker bridge behavior under batching, failure and shutdown.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use simbus::{BatchExecutor, BoxError, BridgeConfig, Error, WorkerBridge};
use std::sync::Arc;
use std::time::Duration;

/// Job that parks the worker until the test opens the gate.
const BLOCK: u32 = 1000;
/// Job that makes its whole batch fail.
const POISON: u32 = 666;

struct Gated {
    gate: Receiver<()>,
    started: Sender<()>,
    batches: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl BatchExecutor for Gated {
    type Job = u32;
    type Output = u32;

    fn execute(&mut self, jobs: &[u32]) -> Result<Vec<u32>, BoxError> {
        self.batches.lock().push(jobs.to_vec());
        if jobs.contains(&BLOCK) {
            self.started.send(()).map_err(|e| e.to_string())?;
            self.gate.recv().map_err(|e| e.to_string())?;
        }
        if jobs.contains(&POISON) {
            return Err("poisoned batch".into());
        }
        Ok(jobs.iter().map(|j| j * 10).collect())
    }
}

struct Harness {
    bridge: WorkerBridge<u32, u32>,
    gate: Sender<()>,
    started: Receiver<()>,
    batches: Arc<Mutex<Vec<Vec<u32>>>>,
}

fn harness(max_batch_size: usize) -> Harness {
    let (gate_tx, gate_rx) = channel::unbounded();
    let (started_tx, started_rx) = channel::unbounded();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let bridge = WorkerBridge::start(
        BridgeConfig::new("test-worker", max_batch_size),
        Gated {
            gate: gate_rx,
            started: started_tx,
            batches: batches.clone(),
        },
    )
    .expect("Failed to start worker");

    Harness {
        bridge,
        gate: gate_tx,
        started: started_rx,
        batches,
    }
}

impl Harness {
    fn wait_started(&self) {
        self.started
            .recv_timeout(Duration::from_secs(5))
            .expect("worker never started the blocking batch");
    }

    fn release(&self) {
        self.gate.send(()).expect("worker gone");
    }
}

/// 5 jobs with max_batch_size = 3: batches of at most 3 summing to 5, each
/// preserving submission order.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_five_jobs_batch_size_three() {
    let h = harness(3);

    let pending: Vec<_> = (1..=5).map(|j| h.bridge.enqueue(j)).collect();
    let mut results = Vec::new();
    for p in pending {
        results.push(p.await.expect("job failed"));
    }
    assert_eq!(results, vec![10, 20, 30, 40, 50]);

    let batches = h.batches.lock().clone();
    assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 5);
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 3));
    let flattened: Vec<u32> = batches.concat();
    assert_eq!(flattened, vec![1, 2, 3, 4, 5]);

    h.bridge.stop().await;
    assert_eq!(h.bridge.stats().items, 5);
}

/// Jobs queued behind a busy worker are batched together.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backlog_is_batched() {
    let h = harness(3);

    let blocker = h.bridge.enqueue(BLOCK);
    h.wait_started();
    let queued: Vec<_> = (1..=5).map(|j| h.bridge.enqueue(j)).collect();
    h.release();

    assert_eq!(blocker.await.expect("blocker failed"), BLOCK * 10);
    for (j, p) in (1..=5).zip(queued) {
        assert_eq!(p.await.expect("job failed"), j * 10);
    }

    let batches = h.batches.lock().clone();
    assert_eq!(batches, vec![vec![BLOCK], vec![1, 2, 3], vec![4, 5]]);

    h.bridge.stop().await;
    let stats = h.bridge.stats();
    assert_eq!(stats.batches, 3);
    assert!((stats.average_batch_size() - 2.0).abs() < f64::EPSILON);
}

/// A failing batch fails every member with the same error.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_failure_is_atomic() {
    let h = harness(3);

    let blocker = h.bridge.enqueue(BLOCK);
    h.wait_started();
    let queued = vec![
        h.bridge.enqueue(1),
        h.bridge.enqueue(POISON),
        h.bridge.enqueue(2),
    ];
    h.release();
    assert!(blocker.await.is_ok());

    let mut reasons = Vec::new();
    for p in queued {
        match p.await {
            Err(Error::BatchFailure(reason)) => reasons.push(reason),
            other => panic!("expected batch failure, got {:?}", other),
        }
    }
    assert_eq!(reasons.len(), 3);
    assert!(reasons.iter().all(|r| r == "poisoned batch"));

    // The worker keeps going.
    assert_eq!(h.bridge.submit(7).await.expect("job after failure"), 70);

    h.bridge.stop().await;
    assert_eq!(h.bridge.stats().failed_batches, 1);
}

/// stop() with 2 queued jobs cancels both; the job mid-execution still
/// gets its real output.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_cancels_queued_but_not_running() {
    let h = harness(3);

    let running = h.bridge.enqueue(BLOCK);
    h.wait_started();
    assert!(running.is_taken());
    let queued_a = h.bridge.enqueue(1);
    let queued_b = h.bridge.enqueue(2);

    h.bridge.request_stop();
    h.release();

    assert_eq!(running.await.expect("running job"), BLOCK * 10);
    assert!(matches!(queued_a.await, Err(Error::Cancelled)));
    assert!(matches!(queued_b.await, Err(Error::Cancelled)));

    h.bridge.stop().await;
    let stats = h.bridge.stats();
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.cancelled_items, 2);
    assert_eq!(h.batches.lock().clone(), vec![vec![BLOCK]]);

    // Submitted after shutdown began.
    assert!(matches!(h.bridge.submit(3).await, Err(Error::Cancelled)));
}

/// Cancelling (or dropping) a queued job keeps it out of the next batch.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_queued() {
    let h = harness(4);

    let mut running = h.bridge.enqueue(BLOCK);
    h.wait_started();
    // Already taken: cancellation is refused.
    assert!(!running.cancel());

    let mut cancelled = h.bridge.enqueue(1);
    let dropped = h.bridge.enqueue(2);
    let kept = h.bridge.enqueue(3);
    assert!(cancelled.cancel());
    drop(dropped);
    h.release();

    assert_eq!(running.await.expect("running job"), BLOCK * 10);
    assert!(matches!(cancelled.await, Err(Error::Cancelled)));
    assert_eq!(kept.await.expect("kept job"), 30);

    assert_eq!(h.batches.lock().clone(), vec![vec![BLOCK], vec![3]]);

    h.bridge.stop().await;
    assert_eq!(h.bridge.stats().cancelled_items, 2);
}

/// Many async callers submitting at once are served and batched.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters() {
    let h = harness(8);
    let bridge = Arc::new(h.bridge);

    let mut tasks = Vec::new();
    for j in 0..64u32 {
        let bridge = bridge.clone();
        tasks.push(tokio::spawn(async move { (j, bridge.submit(j).await) }));
    }
    for task in tasks {
        let (j, result) = task.await.expect("submit task panicked");
        assert_eq!(result.expect("job failed"), j * 10);
    }

    let batches = h.batches.lock().clone();
    assert!(batches.iter().all(|b| b.len() <= 8));
    assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 64);

    bridge.stop().await;
}
