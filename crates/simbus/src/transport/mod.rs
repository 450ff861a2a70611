// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish-subscribe transport primitive.
//!
//! The transport only knows how to publish an opaque sample on a named topic
//! and how to let a subscriber take the samples pending for it. Request/reply,
//! correlation and timeouts are built above it in [`crate::rpc`].
//!
//! Every reader owns its own queue: all readers of a topic see every sample
//! published after they were created (plus retained samples for
//! transient-local endpoints).

mod local;

pub use local::{LocalDomain, DEFAULT_MAX_SAMPLES_PER_READER};

use crate::qos::QoS;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying bus is closed or unreachable.
    #[error("{0}")]
    Unavailable(String),

    /// A reliable writer waited `waited` for reader room on `topic` and gave up.
    #[error("publish on '{topic}' blocked for {waited:?} without reader room")]
    WouldBlock { topic: String, waited: Duration },
}

/// Factory for topic endpoints.
pub trait Transport: Send + Sync + 'static {
    /// Create a writer publishing on `topic`.
    fn create_writer(
        &self,
        topic: &str,
        qos: &QoS,
    ) -> Result<Box<dyn TopicWriter>, TransportError>;

    /// Create a reader subscribed to `topic`.
    fn create_reader(
        &self,
        topic: &str,
        qos: &QoS,
    ) -> Result<Box<dyn TopicReader>, TransportError>;
}

/// Publishing side of a topic.
pub trait TopicWriter: Send + Sync {
    fn topic(&self) -> &str;

    /// Publish one sample to every matched reader.
    fn publish(&self, sample: Vec<u8>) -> Result<(), TransportError>;
}

/// Subscribing side of a topic.
pub trait TopicReader: Send + Sync {
    fn topic(&self) -> &str;

    /// Take every sample currently pending for this reader. Never blocks;
    /// returns an empty list when nothing is pending.
    fn poll(&self) -> Result<Vec<Vec<u8>>, TransportError>;
}
