// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel servers and the dispatch loop.
//!
//! A [`ServiceServer`] polls its request topic, runs the handler for every
//! message and, on bidirectional channels, publishes the handler's value with
//! the request's correlation identifier copied over. Failures are confined to
//! the message that caused them; only the [`StopSignal`] ends the loop.

use crate::error::{BoxError, Error, Result};
use crate::participant::Participant;
use crate::qos::QoS;
use crate::rpc::types;
use crate::rpc::{ChannelInfo, ChannelMode};
use crate::transport::{TopicReader, TopicWriter};
use futures_util::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Longest wait between polls while the request reader keeps failing.
const MAX_POLL_BACKOFF: Duration = Duration::from_millis(100);

/// Boxed handler future, for handlers stored behind a trait object.
pub type HandlerFuture<Resp> =
    Pin<Box<dyn Future<Output = std::result::Result<Resp, BoxError>> + Send + 'static>>;

/// Dispatch loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeOptions {
    /// Messages of one poll processed concurrently (1 = strictly sequential).
    pub max_in_flight: usize,
    /// Sleep between polls that returned nothing.
    pub idle_interval: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            idle_interval: Duration::from_millis(1),
        }
    }
}

impl ServeOptions {
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }
}

/// Cooperative stop flag shared between a controller and serve loops.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Resolve once [`stop`](Self::stop) has been called.
    pub async fn wait(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Wait up to `duration`; returns `true` if stopped.
    pub async fn wait_timeout(&self, duration: Duration) -> bool {
        tokio::time::timeout(duration, self.wait()).await.is_ok()
    }
}

/// Live counters of a [`ServiceServer`].
#[derive(Debug, Default)]
pub struct ServerStats {
    pub requests_processed: AtomicU64,
    pub handler_failures: AtomicU64,
    pub reply_failures: AtomicU64,
    pub decode_failures: AtomicU64,
    pub poll_failures: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStatsSnapshot {
    pub requests_processed: u64,
    pub handler_failures: u64,
    pub reply_failures: u64,
    pub decode_failures: u64,
    pub poll_failures: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            reply_failures: self.reply_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }
}

/// Server side of a channel.
///
/// Built with [`new`](ServiceServer::new) for a bidirectional channel or
/// [`oneway`](ServiceServer::oneway) for a fire-and-forget one.
pub struct ServiceServer<Req, Resp> {
    info: ChannelInfo,
    reader: Box<dyn TopicReader>,
    /// Reply writer, `None` on oneway channels
    writer: Option<Box<dyn TopicWriter>>,
    options: ServeOptions,
    stats: ServerStats,
    _participant: Arc<Participant>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

/// Server side of a fire-and-forget channel.
pub type OnewayServer<Req> = ServiceServer<Req, ()>;

impl<Req> ServiceServer<Req, ()> {
    /// Create a server for the oneway channel `name`.
    pub fn oneway(participant: &Arc<Participant>, name: &str, qos: QoS) -> Result<Self> {
        let info = ChannelInfo::new(name, ChannelMode::Oneway, qos)?;
        Self::with_info(participant, info)
    }
}

impl<Req, Resp> ServiceServer<Req, Resp> {
    /// Create a server for the bidirectional channel `name`.
    pub fn new(participant: &Arc<Participant>, name: &str, qos: QoS) -> Result<Self> {
        let info = ChannelInfo::new(name, ChannelMode::Bidirectional, qos)?;
        Self::with_info(participant, info)
    }

    fn with_info(participant: &Arc<Participant>, info: ChannelInfo) -> Result<Self> {
        let reader = participant.create_reader(&info.request_topic, &info.qos)?;
        let writer = match &info.reply_topic {
            Some(topic) => Some(participant.create_writer(topic, &info.qos)?),
            None => None,
        };

        log::debug!("server for '{}' created ({:?})", info.name, info.mode);

        Ok(Self {
            info,
            reader,
            writer,
            options: ServeOptions::default(),
            stats: ServerStats::default(),
            _participant: participant.clone(),
            _marker: PhantomData,
        })
    }

    pub fn with_options(mut self, options: ServeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn channel(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn options(&self) -> ServeOptions {
        self.options
    }

    pub fn stats(&self) -> ServerStatsSnapshot {
        self.stats.snapshot()
    }
}

impl<Req, Resp> ServiceServer<Req, Resp>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    /// Run the dispatch loop until `stop` is set.
    ///
    /// Messages of one poll start in transport order; up to
    /// `options.max_in_flight` run at once. The loop checks `stop` only
    /// between polls, so messages already taken are always finished.
    ///
    /// The handler is any `Fn(Req) -> impl Future<Output = Result<Resp, BoxError>>`;
    /// a handler with nothing to await is just an `async move` block.
    pub async fn serve<H, Fut>(&self, handler: H, stop: &StopSignal)
    where
        H: Fn(Req) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<Resp, BoxError>> + Send,
    {
        log::info!(
            "serving '{}' (max_in_flight={})",
            self.info.name,
            self.options.max_in_flight
        );
        let handler = &handler;
        // Consecutive poll failures; only the first of a run is logged loudly.
        let mut failing: u32 = 0;

        while !stop.is_stopped() {
            let samples = match self.reader.poll() {
                Ok(samples) => {
                    if failing > 0 {
                        log::info!(
                            "'{}': request poll recovered after {} failures",
                            self.info.name,
                            failing
                        );
                        failing = 0;
                    }
                    samples
                }
                Err(e) => {
                    self.stats.poll_failures.fetch_add(1, Ordering::Relaxed);
                    if failing == 0 {
                        log::warn!("'{}': request poll failed: {}", self.info.name, e);
                    } else {
                        log::trace!("'{}': request poll failed: {}", self.info.name, e);
                    }
                    failing = failing.saturating_add(1);
                    stop.wait_timeout(poll_backoff(self.options.idle_interval, failing))
                        .await;
                    continue;
                }
            };

            if samples.is_empty() {
                stop.wait_timeout(self.options.idle_interval).await;
                continue;
            }

            futures_util::stream::iter(samples)
                .for_each_concurrent(self.options.max_in_flight, |sample| {
                    self.process(handler, sample)
                })
                .await;
        }

        log::info!(
            "'{}' stopped ({} requests processed)",
            self.info.name,
            self.stats.requests_processed.load(Ordering::Relaxed)
        );
    }

    async fn process<H, Fut>(&self, handler: &H, sample: Vec<u8>)
    where
        H: Fn(Req) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<Resp, BoxError>> + Send,
    {
        let envelope = match types::decode::<Req>(&sample) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("'{}': undecodable request skipped: {}", self.info.name, e);
                return;
            }
        };

        let outcome = AssertUnwindSafe(handler(envelope.body))
            .catch_unwind()
            .await;
        self.stats.requests_processed.fetch_add(1, Ordering::Relaxed);

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("'{}': {}", self.info.name, Error::HandlerFailure(e.to_string()));
                return;
            }
            Err(_) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "'{}': {}",
                    self.info.name,
                    Error::HandlerFailure("handler panicked".into())
                );
                return;
            }
        };

        let Some(writer) = &self.writer else {
            return;
        };
        let Some(id) = envelope.correlation_id else {
            log::debug!(
                "'{}': request without correlation id, reply not sent",
                self.info.name
            );
            return;
        };

        let published = types::encode(Some(id), &response)
            .and_then(|bytes| writer.publish(bytes).map_err(Error::from));
        if let Err(e) = published {
            self.stats.reply_failures.fetch_add(1, Ordering::Relaxed);
            log::error!("'{}': reply {} not published: {}", self.info.name, id, e);
        }
    }
}

/// Wait before the next poll after `failures` consecutive poll errors.
fn poll_backoff(idle_interval: Duration, failures: u32) -> Duration {
    idle_interval
        .saturating_mul(1 << failures.min(16))
        .min(MAX_POLL_BACKOFF)
        .max(idle_interval)
}
