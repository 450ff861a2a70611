// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel clients.
//!
//! [`ServiceClient`] sends correlated requests and waits for replies;
//! [`OnewayClient`] publishes and returns.

use crate::error::{Error, Result};
use crate::participant::Participant;
use crate::qos::QoS;
use crate::rpc::types::{self, CorrelationId, RequesterGuid};
use crate::rpc::{ChannelInfo, ChannelMode};
use crate::transport::{TopicReader, TopicWriter, TransportError};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Delay between reply polls when nothing arrived.
const REPLY_POLL_INTERVAL: Duration = Duration::from_micros(100);

type ReplySlot<Resp> = oneshot::Sender<Result<Resp>>;

/// Client side of a bidirectional channel.
///
/// Any number of requests may be outstanding at once; each resolves with the
/// reply carrying its own [`CorrelationId`], in whatever order replies arrive.
///
/// # Example
///
/// ```rust,no_run
/// use simbus::rpc::ServiceClient;
/// use simbus::qos::reliable_qos;
/// use simbus::Participant;
/// use std::time::Duration;
///
/// # async fn example() -> simbus::Result<()> {
/// let participant = Participant::new("runtime")?;
/// let client = ServiceClient::<u32, u32>::new(&participant, "square", reliable_qos())?
///     .with_default_timeout(Some(Duration::from_secs(5)));
///
/// let squared = client.call(&12).await?;
/// # Ok(())
/// # }
/// ```
pub struct ServiceClient<Req, Resp> {
    inner: Arc<ClientInner<Resp>>,

    /// Reply listener, spawned on first request
    listener: Mutex<Option<JoinHandle<()>>>,

    default_timeout: Option<Duration>,

    _request: PhantomData<fn(Req)>,
}

struct ClientInner<Resp> {
    info: ChannelInfo,
    writer: Box<dyn TopicWriter>,
    reader: Box<dyn TopicReader>,
    requester: RequesterGuid,
    sequence: AtomicU64,
    pending: DashMap<CorrelationId, ReplySlot<Resp>>,
    shutdown: AtomicBool,
    /// Set once the reply reader reports the bus gone.
    broken: Mutex<Option<String>>,
    stats: ClientStats,
    _participant: Arc<Participant>,
}

/// Live counters of a [`ServiceClient`].
#[derive(Debug, Default)]
pub struct ClientStats {
    pub requests_sent: AtomicU64,
    pub replies_matched: AtomicU64,
    /// Replies with no pending call (late, cancelled or for another client).
    pub replies_unmatched: AtomicU64,
    pub timeouts: AtomicU64,
}

/// Point-in-time copy of [`ClientStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientStatsSnapshot {
    pub requests_sent: u64,
    pub replies_matched: u64,
    pub replies_unmatched: u64,
    pub timeouts: u64,
}

impl ClientStats {
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            replies_matched: self.replies_matched.load(Ordering::Relaxed),
            replies_unmatched: self.replies_unmatched.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Removes a pending call when the request finishes, fails or is dropped.
struct PendingGuard<'a, Resp> {
    pending: &'a DashMap<CorrelationId, ReplySlot<Resp>>,
    id: CorrelationId,
}

impl<Resp> Drop for PendingGuard<'_, Resp> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl<Req, Resp> ServiceClient<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned + Send + 'static,
{
    /// Create a client for the bidirectional channel `name`.
    ///
    /// Requests wait forever unless a timeout is passed or a default is set
    /// with [`with_default_timeout`](Self::with_default_timeout).
    pub fn new(participant: &Arc<Participant>, name: &str, qos: QoS) -> Result<Self> {
        let info = ChannelInfo::new(name, ChannelMode::Bidirectional, qos)?;
        let writer = participant.create_writer(&info.request_topic, &info.qos)?;
        let reader = participant.create_reader(&super::reply_topic(name), &info.qos)?;
        let requester = RequesterGuid::generate();

        log::debug!("client for '{}' created (requester {})", name, requester);

        Ok(Self {
            inner: Arc::new(ClientInner {
                info,
                writer,
                reader,
                requester,
                sequence: AtomicU64::new(1),
                pending: DashMap::new(),
                shutdown: AtomicBool::new(false),
                broken: Mutex::new(None),
                stats: ClientStats::default(),
                _participant: participant.clone(),
            }),
            listener: Mutex::new(None),
            default_timeout: None,
            _request: PhantomData,
        })
    }

    /// Set the timeout used by [`call`](Self::call).
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Send `msg` and wait for its reply, at most `timeout` when given.
    ///
    /// The pending call is registered before the request is published, and
    /// removed on every exit path, including when this future is dropped.
    pub async fn request(&self, msg: &Req, timeout: Option<Duration>) -> Result<Resp> {
        let inner = &self.inner;
        if inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::Shutdown(inner.info.name.clone()));
        }
        if let Some(reason) = inner.broken.lock().clone() {
            return Err(Error::TransportUnavailable(reason));
        }
        self.ensure_listener();

        let id = CorrelationId::new(
            inner.requester,
            inner.sequence.fetch_add(1, Ordering::Relaxed),
        );
        let payload = types::encode(Some(id), msg)?;

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &inner.pending,
            id,
        };

        inner.writer.publish(payload)?;
        inner.stats.requests_sent.fetch_add(1, Ordering::Relaxed);
        log::trace!("'{}': request {} sent", inner.info.name, id);

        let outcome = match timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    inner.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "'{}': request {} timed out after {:?}",
                        inner.info.name,
                        id,
                        after
                    );
                    return Err(Error::Timeout {
                        channel: inner.info.name.clone(),
                        after,
                    });
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => result,
            // Slot dropped without an answer: the client was shut down.
            Err(_) => Err(Error::Shutdown(inner.info.name.clone())),
        }
    }

    /// Send `msg` using the default timeout.
    pub async fn call(&self, msg: &Req) -> Result<Resp> {
        self.request(msg, self.default_timeout).await
    }

    fn ensure_listener(&self) {
        let mut listener = self.listener.lock();
        if listener.is_none() {
            *listener = Some(tokio::spawn(reply_listener(Arc::downgrade(&self.inner))));
        }
    }
}

impl<Req, Resp> ServiceClient<Req, Resp> {
    pub fn channel(&self) -> &ChannelInfo {
        &self.inner.info
    }

    pub fn requester(&self) -> RequesterGuid {
        self.inner.requester
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Stop the reply listener; pending and future requests fail with `Shutdown`.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.pending.clear();
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        log::debug!("client for '{}' shut down", self.inner.info.name);
    }
}

impl<Req, Resp> Drop for ServiceClient<Req, Resp> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<Resp: DeserializeOwned> ClientInner<Resp> {
    /// Take pending replies and resolve matching calls. Returns the number
    /// of samples taken, or `None` once the bus is gone.
    fn dispatch_replies(&self) -> Option<usize> {
        let samples = match self.reader.poll() {
            Ok(samples) => samples,
            Err(TransportError::Unavailable(reason)) => {
                log::warn!("'{}': reply reader unavailable: {}", self.info.name, reason);
                // Mark first so no new call registers after the sweep.
                *self.broken.lock() = Some(reason.clone());
                self.fail_pending(&reason);
                return None;
            }
            Err(e) => {
                log::debug!("'{}': reply poll failed: {}", self.info.name, e);
                return Some(0);
            }
        };

        for sample in &samples {
            let id = match types::decode_header(sample) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    self.stats.replies_unmatched.fetch_add(1, Ordering::Relaxed);
                    log::debug!("'{}': reply without correlation id dropped", self.info.name);
                    continue;
                }
                Err(e) => {
                    log::warn!("'{}': undecodable reply skipped: {}", self.info.name, e);
                    continue;
                }
            };

            match self.pending.remove(&id) {
                Some((_, tx)) => {
                    self.stats.replies_matched.fetch_add(1, Ordering::Relaxed);
                    let result = types::decode::<Resp>(sample).map(|envelope| envelope.body);
                    log::trace!("'{}': reply {} matched", self.info.name, id);
                    // Receiver may have been dropped between remove and send
                    drop(tx.send(result));
                }
                None => {
                    self.stats.replies_unmatched.fetch_add(1, Ordering::Relaxed);
                    log::debug!("'{}': unmatched reply {} dropped", self.info.name, id);
                }
            }
        }
        Some(samples.len())
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                drop(tx.send(Err(Error::TransportUnavailable(reason.to_string()))));
            }
        }
    }
}

/// Background matcher: runs until the client is dropped, shut down or its
/// reply reader becomes unavailable.
async fn reply_listener<Resp: DeserializeOwned>(inner: Weak<ClientInner<Resp>>) {
    loop {
        let Some(client) = inner.upgrade() else {
            break;
        };
        if client.shutdown.load(Ordering::Acquire) {
            break;
        }
        let Some(taken) = client.dispatch_replies() else {
            break;
        };
        drop(client);

        if taken == 0 {
            tokio::time::sleep(REPLY_POLL_INTERVAL).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

/// Client side of a fire-and-forget channel.
pub struct OnewayClient<Req> {
    info: ChannelInfo,
    writer: Box<dyn TopicWriter>,
    messages_sent: AtomicU64,
    _participant: Arc<Participant>,
    _request: PhantomData<fn(Req)>,
}

impl<Req: Serialize> OnewayClient<Req> {
    pub fn new(participant: &Arc<Participant>, name: &str, qos: QoS) -> Result<Self> {
        let info = ChannelInfo::new(name, ChannelMode::Oneway, qos)?;
        let writer = participant.create_writer(&info.request_topic, &info.qos)?;
        log::debug!("oneway client for '{}' created", name);

        Ok(Self {
            info,
            writer,
            messages_sent: AtomicU64::new(0),
            _participant: participant.clone(),
            _request: PhantomData,
        })
    }

    /// Publish `msg`. No delivery acknowledgment.
    pub fn send(&self, msg: &Req) -> Result<()> {
        let payload = types::encode(None, msg)?;
        self.writer.publish(payload)?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn channel(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::reliable_qos;
    use crate::transport::LocalDomain;

    fn participant() -> Arc<Participant> {
        Participant::with_transport("test", Arc::new(LocalDomain::new(0))).unwrap()
    }

    #[tokio::test]
    async fn test_request_without_server_times_out_and_cleans_up() {
        let p = participant();
        let client = ServiceClient::<u32, u32>::new(&p, "nobody", reliable_qos()).unwrap();

        let err = client
            .request(&1, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.stats().timeouts, 1);
        assert_eq!(client.stats().requests_sent, 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_requests() {
        let p = participant();
        let client = ServiceClient::<u32, u32>::new(&p, "svc", reliable_qos()).unwrap();
        client.shutdown();

        let err = client.request(&1, None).await.unwrap_err();
        assert!(matches!(err, Error::Shutdown(name) if name == "svc"));
    }

    #[tokio::test]
    async fn test_dropped_request_future_removes_pending() {
        let p = participant();
        let client = ServiceClient::<u32, u32>::new(&p, "svc", reliable_qos()).unwrap();

        let fut = client.request(&1, None);
        // Poll once so the call is registered, then drop it.
        let cancelled = tokio::time::timeout(Duration::from_millis(5), fut).await;
        assert!(cancelled.is_err());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_default_timeout_applies_to_call() {
        let p = participant();
        let client = ServiceClient::<u32, u32>::new(&p, "svc", reliable_qos())
            .unwrap()
            .with_default_timeout(Some(Duration::from_millis(5)));

        assert_eq!(client.default_timeout(), Some(Duration::from_millis(5)));
        assert!(matches!(
            client.call(&3).await,
            Err(Error::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_bus_stops_listener_and_fails_fast() {
        let domain = Arc::new(LocalDomain::new(0));
        let p = Participant::with_transport("test", domain.clone()).unwrap();
        let client = ServiceClient::<u32, u32>::new(&p, "svc", reliable_qos()).unwrap();

        domain.close();
        let err = client
            .request(&1, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));

        let finished = || {
            client
                .listener
                .lock()
                .as_ref()
                .is_some_and(|handle| handle.is_finished())
        };
        for _ in 0..200 {
            if finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(finished());

        // Rejected before anything is published or registered.
        let sent = client.stats().requests_sent;
        let err = client.request(&2, None).await.unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));
        assert_eq!(client.stats().requests_sent, sent);
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_oneway_send_reaches_subscriber() {
        let p = participant();
        let client = OnewayClient::<String>::new(&p, "log", reliable_qos()).unwrap();
        let reader = p.create_reader("log/req", &reliable_qos()).unwrap();

        client.send(&"hello".to_string()).unwrap();
        let samples = reader.poll().unwrap();
        assert_eq!(samples.len(), 1);

        let envelope: types::Envelope<String> = types::decode(&samples[0]).unwrap();
        assert_eq!(envelope.correlation_id, None);
        assert_eq!(envelope.body, "hello");
        assert_eq!(client.messages_sent(), 1);
    }
}
