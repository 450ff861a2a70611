// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batching worker bridge.
//!
//! Hands work from async dispatch loops to one dedicated OS thread that
//! executes it in batches, then resumes each caller with its own output.
//!
//! ```text
//!  dispatch tasks                     worker thread
//!  --------------                     -------------
//!  enqueue(job) --Work--> [crossbeam queue] --recv--> first item
//!                                          --try_recv--> up to max-1 more
//!                                                         |
//!  PendingWork <--------- oneshot slot <------------ execute(&[jobs])
//! ```
//!
//! Each queued item carries an atomic state (queued / taken / cancelled).
//! The worker takes an item only by moving it from queued to taken, so a
//! cancellation racing with the worker is decided exactly once.

use crate::error::{BoxError, Error, Result};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Batches between two progress log lines.
const PROGRESS_LOG_INTERVAL: u64 = 100;

const QUEUED: u8 = 0;
const TAKEN: u8 = 1;
const CANCELLED: u8 = 2;

/// Batch computation owned by the worker thread.
pub trait BatchExecutor: Send + 'static {
    type Job: Send + 'static;
    type Output: Send + 'static;

    /// Execute a batch; outputs must match `jobs` one-to-one, in order.
    ///
    /// An error (or a panic) fails every job of the batch.
    fn execute(&mut self, jobs: &[Self::Job])
        -> std::result::Result<Vec<Self::Output>, BoxError>;
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Worker thread name.
    pub name: String,
    /// Upper bound on jobs per batch.
    pub max_batch_size: usize,
}

impl BridgeConfig {
    pub fn new(name: &str, max_batch_size: usize) -> Self {
        Self {
            name: name.to_string(),
            max_batch_size: max_batch_size.max(1),
        }
    }
}

/// Live counters of a [`WorkerBridge`].
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub batches: AtomicU64,
    pub items: AtomicU64,
    pub failed_batches: AtomicU64,
    pub cancelled_items: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeStatsSnapshot {
    pub batches: u64,
    pub items: u64,
    pub failed_batches: u64,
    pub cancelled_items: u64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            cancelled_items: self.cancelled_items.load(Ordering::Relaxed),
        }
    }
}

impl BridgeStatsSnapshot {
    pub fn average_batch_size(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.items as f64 / self.batches as f64
        }
    }
}

struct WorkItem<J, O> {
    job: J,
    state: Arc<AtomicU8>,
    slot: oneshot::Sender<Result<O>>,
}

impl<J, O> WorkItem<J, O> {
    fn take(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, TAKEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

enum Command<J, O> {
    Work(WorkItem<J, O>),
    Stop,
}

struct Shared {
    name: String,
    stopping: AtomicBool,
    stats: BridgeStats,
}

/// Handle to a worker thread executing jobs of type `J` into outputs `O`.
pub struct WorkerBridge<J, O> {
    config: BridgeConfig,
    sender: Sender<Command<J, O>>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<J, O> WorkerBridge<J, O>
where
    J: Send + 'static,
    O: Send + 'static,
{
    /// Spawn the worker thread, which takes ownership of `executor`.
    pub fn start<E>(config: BridgeConfig, executor: E) -> Result<Self>
    where
        E: BatchExecutor<Job = J, Output = O>,
    {
        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            stopping: AtomicBool::new(false),
            stats: BridgeStats::default(),
        });

        let worker_shared = shared.clone();
        let max_batch_size = config.max_batch_size;
        let handle = std::thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || worker_loop(executor, receiver, worker_shared, max_batch_size))?;

        log::info!(
            "worker '{}' started (max_batch_size={})",
            config.name,
            config.max_batch_size
        );

        Ok(Self {
            config,
            sender,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue `job` and return a handle resolving to its output.
    ///
    /// Work queued once stopping has begun resolves with `Cancelled`.
    pub fn enqueue(&self, job: J) -> PendingWork<O> {
        let (slot, receiver) = oneshot::channel();
        let state = Arc::new(AtomicU8::new(QUEUED));
        let pending = PendingWork {
            receiver,
            state: state.clone(),
            cancelled: false,
        };

        if self.shared.stopping.load(Ordering::Acquire) {
            state.store(CANCELLED, Ordering::Release);
            self.shared.stats.cancelled_items.fetch_add(1, Ordering::Relaxed);
            drop(slot.send(Err(Error::Cancelled)));
            return pending;
        }

        let item = WorkItem { job, state, slot };
        if let Err(channel::SendError(Command::Work(item))) = self.sender.send(Command::Work(item))
        {
            // Worker already gone.
            item.state.store(CANCELLED, Ordering::Release);
            self.shared.stats.cancelled_items.fetch_add(1, Ordering::Relaxed);
            drop(item.slot.send(Err(Error::Cancelled)));
        }
        pending
    }

    /// Queue `job` and wait for its output.
    pub async fn submit(&self, job: J) -> Result<O> {
        self.enqueue(job).await
    }
}

impl<J, O> WorkerBridge<J, O> {
    /// Begin shutdown without waiting: the worker finishes its current batch,
    /// then cancels everything still queued and exits.
    pub fn request_stop(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("worker '{}': stop requested", self.config.name);
        // Wakes a worker blocked on an empty queue.
        drop(self.sender.send(Command::Stop));
    }

    /// Stop and wait for the worker thread to exit.
    pub async fn stop(&self) {
        self.request_stop();
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };

        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => log::error!("worker '{}' thread panicked", self.config.name),
            Err(e) => log::error!("worker '{}' join failed: {}", self.config.name, e),
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<J, O> Drop for WorkerBridge<J, O> {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// Output of one queued job.
///
/// Resolves with the job's output, the batch error, or `Cancelled`.
/// Dropping it while the job is still queued cancels the job.
pub struct PendingWork<O> {
    receiver: oneshot::Receiver<Result<O>>,
    state: Arc<AtomicU8>,
    cancelled: bool,
}

impl<O> PendingWork<O> {
    /// Cancel the job if the worker has not taken it yet.
    ///
    /// Returns `false` once the job is part of an executing batch; it then
    /// runs to completion and this handle still yields its output.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            return true;
        }
        self.cancelled = self
            .state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.cancelled
    }

    /// Whether the worker has taken the job into a batch.
    pub fn is_taken(&self) -> bool {
        self.state.load(Ordering::Acquire) == TAKEN
    }
}

impl<O> Future for PendingWork<O> {
    type Output = Result<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(Err(Error::Cancelled));
        }
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Slot dropped unresolved: discarded with the queue.
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<O> Drop for PendingWork<O> {
    fn drop(&mut self) {
        // No-op once taken or resolved.
        drop(
            self.state
                .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire),
        );
    }
}

fn worker_loop<E: BatchExecutor>(
    mut executor: E,
    receiver: Receiver<Command<E::Job, E::Output>>,
    shared: Arc<Shared>,
    max_batch_size: usize,
) {
    let mut stop_seen = false;

    while !stop_seen {
        let first = match receiver.recv() {
            Ok(Command::Work(item)) => item,
            Ok(Command::Stop) | Err(_) => break,
        };
        if shared.stopping.load(Ordering::Acquire) {
            cancel_item(&shared, first);
            break;
        }

        let mut batch = Vec::with_capacity(max_batch_size);
        admit(&shared, &mut batch, first);
        while batch.len() < max_batch_size {
            match receiver.try_recv() {
                Ok(Command::Work(item)) => admit(&shared, &mut batch, item),
                Ok(Command::Stop) => {
                    stop_seen = true;
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if !batch.is_empty() {
            run_batch(&mut executor, batch, &shared);
        }
    }

    let mut leftovers = 0;
    while let Ok(command) = receiver.try_recv() {
        if let Command::Work(item) = command {
            cancel_item(&shared, item);
            leftovers += 1;
        }
    }

    let stats = shared.stats.snapshot();
    log::info!(
        "worker '{}' exited: {} batches, {} items, {} cancelled at shutdown",
        shared.name,
        stats.batches,
        stats.items,
        leftovers
    );
}

/// Move `item` into `batch` if it is still queued; drop it otherwise.
fn admit<J, O>(shared: &Shared, batch: &mut Vec<WorkItem<J, O>>, item: WorkItem<J, O>) {
    if item.take() {
        batch.push(item);
    } else {
        shared.stats.cancelled_items.fetch_add(1, Ordering::Relaxed);
    }
}

fn cancel_item<J, O>(shared: &Shared, item: WorkItem<J, O>) {
    shared.stats.cancelled_items.fetch_add(1, Ordering::Relaxed);
    let was_queued = item
        .state
        .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok();
    if was_queued {
        drop(item.slot.send(Err(Error::Cancelled)));
    }
}

fn run_batch<E: BatchExecutor>(
    executor: &mut E,
    batch: Vec<WorkItem<E::Job, E::Output>>,
    shared: &Shared,
) {
    let size = batch.len();
    let (jobs, slots): (Vec<E::Job>, Vec<oneshot::Sender<Result<E::Output>>>) =
        batch.into_iter().map(|item| (item.job, item.slot)).unzip();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(&jobs)));

    let batches = shared.stats.batches.fetch_add(1, Ordering::Relaxed) + 1;
    shared.stats.items.fetch_add(size as u64, Ordering::Relaxed);

    let result = match outcome {
        Ok(Ok(outputs)) if outputs.len() == size => Ok(outputs),
        Ok(Ok(outputs)) => Err(format!(
            "executor returned {} outputs for {} jobs",
            outputs.len(),
            size
        )),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    };

    match result {
        Ok(outputs) => {
            for (slot, output) in slots.into_iter().zip(outputs) {
                drop(slot.send(Ok(output)));
            }
        }
        Err(reason) => {
            shared.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "worker '{}': batch of {} failed: {}",
                shared.name,
                size,
                reason
            );
            for slot in slots {
                drop(slot.send(Err(Error::BatchFailure(reason.clone()))));
            }
        }
    }

    if batches % PROGRESS_LOG_INTERVAL == 0 {
        let stats = shared.stats.snapshot();
        log::info!(
            "worker '{}': {} batches, average batch size {:.2}",
            shared.name,
            stats.batches,
            stats.average_batch_size()
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("executor panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("executor panicked: {}", msg)
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler {
        batch_sizes: Arc<Mutex<Vec<usize>>>,
    }

    impl BatchExecutor for Doubler {
        type Job = u32;
        type Output = u32;

        fn execute(&mut self, jobs: &[u32]) -> std::result::Result<Vec<u32>, BoxError> {
            self.batch_sizes.lock().push(jobs.len());
            Ok(jobs.iter().map(|j| j * 2).collect())
        }
    }

    struct ShortChanged;

    impl BatchExecutor for ShortChanged {
        type Job = u32;
        type Output = u32;

        fn execute(&mut self, _jobs: &[u32]) -> std::result::Result<Vec<u32>, BoxError> {
            Ok(Vec::new())
        }
    }

    struct Panicker;

    impl BatchExecutor for Panicker {
        type Job = u32;
        type Output = u32;

        fn execute(&mut self, jobs: &[u32]) -> std::result::Result<Vec<u32>, BoxError> {
            if jobs.contains(&13) {
                panic!("unlucky job");
            }
            Ok(jobs.to_vec())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_returns_output() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let bridge = WorkerBridge::start(
            BridgeConfig::new("doubler", 4),
            Doubler {
                batch_sizes: sizes.clone(),
            },
        )
        .unwrap();

        assert_eq!(bridge.submit(21).await.unwrap(), 42);
        bridge.stop().await;
        assert_eq!(bridge.stats().batches, 1);
        assert_eq!(bridge.stats().items, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_output_count_mismatch_fails_batch() {
        let bridge = WorkerBridge::start(BridgeConfig::new("short", 4), ShortChanged).unwrap();
        let err = bridge.submit(1).await.unwrap_err();
        assert!(matches!(err, Error::BatchFailure(msg) if msg.contains("0 outputs for 1 jobs")));
        assert_eq!(bridge.stats().failed_batches, 1);
        bridge.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_executor_panic_is_batch_failure_and_worker_survives() {
        let bridge = WorkerBridge::start(BridgeConfig::new("panicker", 1), Panicker).unwrap();

        let err = bridge.submit(13).await.unwrap_err();
        assert!(matches!(err, Error::BatchFailure(msg) if msg.contains("unlucky job")));
        assert_eq!(bridge.submit(5).await.unwrap(), 5);
        bridge.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_after_stop_is_cancelled() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let bridge = WorkerBridge::start(
            BridgeConfig::new("stopped", 2),
            Doubler {
                batch_sizes: sizes.clone(),
            },
        )
        .unwrap();
        bridge.stop().await;
        assert!(bridge.is_stopping());

        assert!(matches!(bridge.submit(1).await, Err(Error::Cancelled)));
        assert!(sizes.lock().is_empty());
        // Stopping twice is harmless.
        bridge.stop().await;
    }

    #[test]
    fn test_cancel_is_decided_once() {
        let (slot, receiver) = oneshot::channel::<Result<u32>>();
        let state = Arc::new(AtomicU8::new(QUEUED));
        let mut pending = PendingWork {
            receiver,
            state: state.clone(),
            cancelled: false,
        };
        let item = WorkItem {
            job: 1u32,
            state,
            slot,
        };

        assert!(pending.cancel());
        assert!(!item.take());
        assert!(!pending.is_taken());
    }

    #[test]
    fn test_taken_item_cannot_be_cancelled() {
        let (slot, receiver) = oneshot::channel::<Result<u32>>();
        let state = Arc::new(AtomicU8::new(QUEUED));
        let mut pending = PendingWork {
            receiver,
            state: state.clone(),
            cancelled: false,
        };
        let item = WorkItem {
            job: 1u32,
            state,
            slot,
        };

        assert!(item.take());
        assert!(!pending.cancel());
        assert!(pending.is_taken());
    }

    #[test]
    fn test_average_batch_size() {
        let snapshot = BridgeStatsSnapshot {
            batches: 4,
            items: 10,
            ..Default::default()
        };
        assert!((snapshot.average_batch_size() - 2.5).abs() < f64::EPSILON);
        assert_eq!(BridgeStatsSnapshot::default().average_batch_size(), 0.0);
    }
}
