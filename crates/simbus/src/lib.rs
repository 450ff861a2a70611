// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # simbus - correlated request/response over publish-subscribe
//!
//! Services address each other by channel name on a shared pub-sub bus. The
//! bus only moves opaque samples between topics; simbus builds on it:
//!
//! - correlated request/response with many concurrent calls per channel,
//!   timeouts and cancellation
//! - fire-and-forget channels
//! - a dispatch loop that keeps serving when a single message fails
//! - per-service session registries with lazily built resources
//! - a batching bridge that runs expensive work on a dedicated thread
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simbus::rpc::{ServiceClient, ServiceServer, StopSignal};
//! use simbus::qos::reliable_qos;
//! use simbus::{Participant, Result};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let participant = Participant::builder("quickstart").domain_id(0).build()?;
//!
//!     let server = ServiceServer::<String, String>::new(&participant, "echo", reliable_qos())?;
//!     let stop = StopSignal::new();
//!     let serving = stop.clone();
//!     tokio::spawn(async move {
//!         server
//!             .serve(|msg: String| async move { Ok(msg.to_uppercase()) }, &serving)
//!             .await
//!     });
//!
//!     let client = ServiceClient::<String, String>::new(&participant, "echo", reliable_qos())?;
//!     let reply = client
//!         .request(&"ping".to_string(), Some(Duration::from_secs(5)))
//!         .await?;
//!     assert_eq!(reply, "PING");
//!
//!     stop.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  ServiceClient / OnewayClient        ServiceServer::serve            |
//! |  (pending table + reply listener)    (poll -> handler -> reply)      |
//! +---------------------------------------------------------------------+
//! |  SessionRegistry                     WorkerBridge                    |
//! |  (start / close / get_or_create)     (queue -> batch -> resume)      |
//! +---------------------------------------------------------------------+
//! |  Participant -> Transport (TopicWriter / TopicReader), QoS           |
//! |  LocalDomain: in-process implementation                             |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Logging
//!
//! Everything is logged through the `log` facade; install any logger (or a
//! `tracing` subscriber with its log bridge) to see it.

pub mod bridge;
pub mod error;
pub mod participant;
pub mod qos;
pub mod rpc;
pub mod session;
pub mod transport;

pub use bridge::{BatchExecutor, BridgeConfig, BridgeStatsSnapshot, PendingWork, WorkerBridge};
pub use error::{BoxError, Error, Result};
pub use participant::{Participant, ParticipantBuilder};
pub use qos::{reliable_qos, session_qos, Durability, History, QoS, Reliability};
pub use rpc::{
    ChannelInfo, ChannelMode, CorrelationId, OnewayClient, OnewayServer, ServeOptions,
    ServiceClient, ServiceServer, StopSignal,
};
pub use session::{SessionRegistry, SessionState};
pub use transport::{LocalDomain, TopicReader, TopicWriter, Transport, TransportError};
