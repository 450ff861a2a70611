// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport.
//!
//! Writers and readers created on the same [`LocalDomain`] are bound by topic
//! name, the same way intra-process endpoints are auto-bound inside one DDS
//! domain.
//!
//! ```text
//! REGISTRY (static, initialized once)
//! +-- Mutex<HashMap<DomainId, Weak<DomainInner>>>
//!
//! DomainInner (one per domain, per process)
//! +-- topics: Mutex<HashMap<topic, TopicState>>
//!     +-- readers: Vec<Weak<ReaderQueue>>
//!     +-- writers: Vec<Weak<WriterState>>   (retained samples live here)
//! ```

use super::{TopicReader, TopicWriter, Transport, TransportError};
use crate::qos::{Durability, QoS, Reliability};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

/// Bound on a KEEP_ALL reader queue.
pub const DEFAULT_MAX_SAMPLES_PER_READER: usize = 4096;

type DomainId = u32;

static REGISTRY: OnceLock<Mutex<HashMap<DomainId, Weak<DomainInner>>>> = OnceLock::new();

/// Handle to an in-process publish-subscribe domain.
///
/// Cloning the handle shares the domain.
#[derive(Clone)]
pub struct LocalDomain {
    inner: Arc<DomainInner>,
}

struct DomainInner {
    domain_id: DomainId,
    max_samples_per_reader: usize,
    closed: AtomicBool,
    dropped_samples: AtomicU64,
    topics: Mutex<HashMap<Arc<str>, TopicState>>,
}

#[derive(Default)]
struct TopicState {
    readers: Vec<Weak<ReaderQueue>>,
    writers: Vec<Weak<WriterState>>,
}

struct ReaderQueue {
    qos: QoS,
    samples: Mutex<VecDeque<Vec<u8>>>,
    space: Condvar,
}

struct WriterState {
    qos: QoS,
    retained: Mutex<VecDeque<Vec<u8>>>,
}

impl LocalDomain {
    /// Create a private domain not visible through [`LocalDomain::shared`].
    pub fn new(domain_id: DomainId) -> Self {
        Self::with_limits(domain_id, DEFAULT_MAX_SAMPLES_PER_READER)
    }

    /// Create a private domain with a custom KEEP_ALL queue bound.
    pub fn with_limits(domain_id: DomainId, max_samples_per_reader: usize) -> Self {
        Self {
            inner: Arc::new(DomainInner {
                domain_id,
                max_samples_per_reader: max_samples_per_reader.max(1),
                closed: AtomicBool::new(false),
                dropped_samples: AtomicU64::new(0),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Return the process-wide domain for `domain_id`, creating it on first use.
    ///
    /// The domain stays alive while any handle or endpoint refers to it.
    pub fn shared(domain_id: DomainId) -> Self {
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut domains = registry.lock();

        if let Some(inner) = domains.get(&domain_id).and_then(Weak::upgrade) {
            return Self { inner };
        }

        let domain = Self::new(domain_id);
        domains.insert(domain_id, Arc::downgrade(&domain.inner));
        log::debug!("LocalDomain {} created", domain_id);
        domain
    }

    pub fn domain_id(&self) -> DomainId {
        self.inner.domain_id
    }

    /// Make every subsequent publish and poll fail with `Unavailable`.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("LocalDomain {} closed", self.inner.domain_id);

        // Wake writers blocked on a full reader queue.
        let topics = self.inner.topics.lock();
        for state in topics.values() {
            for reader in state.readers.iter().filter_map(Weak::upgrade) {
                reader.space.notify_all();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Samples discarded by best-effort writers facing a full KEEP_ALL reader.
    pub fn dropped_samples(&self) -> u64 {
        self.inner.dropped_samples.load(Ordering::Relaxed)
    }
}

impl DomainInner {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Unavailable(format!(
                "local domain {} is closed",
                self.domain_id
            )))
        } else {
            Ok(())
        }
    }

    /// Live readers on `topic` whose requested reliability `offered` satisfies.
    ///
    /// `retain` runs under the topic lock so a reader joining concurrently
    /// gets the sample either from retention or from delivery, never both.
    fn matched_readers(
        &self,
        topic: &str,
        offered: &Reliability,
        retain: impl FnOnce(),
    ) -> Vec<Arc<ReaderQueue>> {
        let mut topics = self.topics.lock();
        retain();
        let Some(state) = topics.get_mut(topic) else {
            return Vec::new();
        };
        state.readers.retain(|r| r.strong_count() > 0);
        state
            .readers
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|r| offered.satisfies(&r.qos.reliability))
            .collect()
    }

    /// Push `sample` to KEEP_ALL `readers`. Returns how many were skipped.
    ///
    /// A reliable writer pushes to all of them or to none: it waits until
    /// every queue has room, up to its blocking time, before touching any.
    /// A best-effort writer skips the full ones. Queue locks are taken in
    /// address order.
    fn deliver_bounded(
        &self,
        topic: &str,
        readers: &mut [Arc<ReaderQueue>],
        sample: &[u8],
        offered: &Reliability,
    ) -> Result<u64, TransportError> {
        readers.sort_by_key(|r| Arc::as_ptr(r) as usize);
        let start = Instant::now();

        loop {
            self.check_open()?;
            let mut guards: Vec<_> = readers.iter().map(|r| r.samples.lock()).collect();
            let full = guards
                .iter()
                .position(|samples| samples.len() >= self.max_samples_per_reader);

            let Some(index) = full else {
                for samples in &mut guards {
                    samples.push_back(sample.to_vec());
                }
                return Ok(0);
            };

            let max_blocking_time = match offered {
                Reliability::BestEffort => {
                    let mut skipped = 0;
                    for samples in &mut guards {
                        if samples.len() < self.max_samples_per_reader {
                            samples.push_back(sample.to_vec());
                        } else {
                            skipped += 1;
                        }
                    }
                    return Ok(skipped);
                }
                Reliability::Reliable { max_blocking_time } => *max_blocking_time,
            };

            // Wait on the full queue alone; the others stay free to drain.
            let mut samples = guards.swap_remove(index);
            drop(guards);
            let deadline = start + max_blocking_time;
            if readers[index].space.wait_until(&mut samples, deadline).timed_out()
                && samples.len() >= self.max_samples_per_reader
            {
                return Err(TransportError::WouldBlock {
                    topic: topic.to_string(),
                    waited: max_blocking_time,
                });
            }
        }
    }
}

impl Transport for LocalDomain {
    fn create_writer(
        &self,
        topic: &str,
        qos: &QoS,
    ) -> Result<Box<dyn TopicWriter>, TransportError> {
        self.inner.check_open()?;

        let state = Arc::new(WriterState {
            qos: qos.clone(),
            retained: Mutex::new(VecDeque::new()),
        });
        let topic: Arc<str> = Arc::from(topic);
        {
            let mut topics = self.inner.topics.lock();
            let entry = topics.entry(topic.clone()).or_default();
            entry.writers.retain(|w| w.strong_count() > 0);
            entry.writers.push(Arc::downgrade(&state));
        }

        log::debug!(
            "LocalDomain {}: writer created on '{}' ({:?})",
            self.inner.domain_id,
            topic,
            qos
        );

        Ok(Box::new(LocalWriter {
            domain: self.inner.clone(),
            topic,
            state,
        }))
    }

    fn create_reader(
        &self,
        topic: &str,
        qos: &QoS,
    ) -> Result<Box<dyn TopicReader>, TransportError> {
        self.inner.check_open()?;

        let queue = Arc::new(ReaderQueue {
            qos: qos.clone(),
            samples: Mutex::new(VecDeque::new()),
            space: Condvar::new(),
        });
        let topic: Arc<str> = Arc::from(topic);
        {
            let mut topics = self.inner.topics.lock();
            let entry = topics.entry(topic.clone()).or_default();
            entry.readers.retain(|r| r.strong_count() > 0);
            entry.readers.push(Arc::downgrade(&queue));

            // Late-joiner delivery of retained samples.
            if qos.durability == Durability::TransientLocal {
                for writer in entry.writers.iter().filter_map(Weak::upgrade) {
                    if writer.qos.durability != Durability::TransientLocal
                        || !writer.qos.reliability.satisfies(&qos.reliability)
                    {
                        continue;
                    }
                    let retained = writer.retained.lock();
                    let mut samples = queue.samples.lock();
                    for sample in retained.iter() {
                        queue.push_locked(&mut samples, sample.clone());
                    }
                }
            }
        }

        log::debug!(
            "LocalDomain {}: reader created on '{}' ({:?})",
            self.inner.domain_id,
            topic,
            qos
        );

        Ok(Box::new(LocalReader {
            domain: self.inner.clone(),
            topic,
            queue,
        }))
    }
}

impl ReaderQueue {
    /// Append while holding the lock, evicting the oldest sample for KEEP_LAST.
    fn push_locked(&self, samples: &mut VecDeque<Vec<u8>>, sample: Vec<u8>) {
        if let Some(depth) = self.qos.history.depth() {
            while samples.len() >= depth {
                samples.pop_front();
            }
        }
        samples.push_back(sample);
    }

    /// Push without a bound; KEEP_LAST queues evict instead of filling up.
    fn push(&self, sample: Vec<u8>) {
        let mut samples = self.samples.lock();
        self.push_locked(&mut samples, sample);
    }
}

struct LocalWriter {
    domain: Arc<DomainInner>,
    topic: Arc<str>,
    state: Arc<WriterState>,
}

impl TopicWriter for LocalWriter {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, sample: Vec<u8>) -> Result<(), TransportError> {
        self.domain.check_open()?;

        let offered = self.state.qos.reliability;
        let readers = self.domain.matched_readers(&self.topic, &offered, || {
            if self.state.qos.durability == Durability::TransientLocal {
                let depth = self
                    .state
                    .qos
                    .history
                    .depth()
                    .unwrap_or(self.domain.max_samples_per_reader);
                let mut retained = self.state.retained.lock();
                while retained.len() >= depth {
                    retained.pop_front();
                }
                retained.push_back(sample.clone());
            }
        });

        // Bounded queues first: a reliable publish that fails there has
        // reached no reader at all.
        let (mut bounded, unbounded): (Vec<_>, Vec<_>) = readers
            .into_iter()
            .partition(|r| r.qos.history.depth().is_none());
        let dropped = self
            .domain
            .deliver_bounded(&self.topic, &mut bounded, &sample, &offered)?;
        if dropped > 0 {
            self.domain.dropped_samples.fetch_add(dropped, Ordering::Relaxed);
            log::debug!("LocalDomain: best-effort sample dropped on '{}'", self.topic);
        }
        for reader in unbounded {
            reader.push(sample.clone());
        }
        Ok(())
    }
}

struct LocalReader {
    domain: Arc<DomainInner>,
    topic: Arc<str>,
    queue: Arc<ReaderQueue>,
}

impl TopicReader for LocalReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn poll(&self) -> Result<Vec<Vec<u8>>, TransportError> {
        self.domain.check_open()?;

        let mut samples = self.queue.samples.lock();
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let taken: Vec<Vec<u8>> = samples.drain(..).collect();
        drop(samples);
        self.queue.space.notify_all();
        Ok(taken)
    }
}
