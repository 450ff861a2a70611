// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply and fire-and-forget channels over pub-sub topics.
//!
//! # Overview
//!
//! - **Clients** publish requests tagged with a [`CorrelationId`] and wait
//!   for the reply carrying the same identifier
//! - **Servers** poll requests, run a handler, and publish replies with the
//!   request's identifier copied over
//! - **Oneway** channels publish untagged messages and expect no reply
//!
//! # Topic Naming
//!
//! For a channel named "driver/drive":
//! - Request topic: `driver/drive/req`
//! - Reply topic: `driver/drive/resp`
//!
//! Oneway channels only use the request topic.
//!
//! # Example
//!
//! ```rust,no_run
//! use simbus::rpc::{ServiceClient, ServiceServer, StopSignal};
//! use simbus::qos::reliable_qos;
//! use simbus::Participant;
//!
//! # async fn example() -> simbus::Result<()> {
//! let participant = Participant::new("example")?;
//! let server = ServiceServer::<String, String>::new(&participant, "echo", reliable_qos())?;
//! let client = ServiceClient::<String, String>::new(&participant, "echo", reliable_qos())?;
//!
//! let stop = StopSignal::new();
//! let serve_stop = stop.clone();
//! tokio::spawn(async move {
//!     server
//!         .serve(|msg: String| async move { Ok(msg) }, &serve_stop)
//!         .await
//! });
//!
//! let reply = client.request(&"hello".to_string(), None).await?;
//! assert_eq!(reply, "hello");
//! stop.stop();
//! # Ok(())
//! # }
//! ```

mod client;
mod server;
mod types;

pub use client::{ClientStats, ClientStatsSnapshot, OnewayClient, ServiceClient};
pub use server::{
    HandlerFuture, OnewayServer, ServeOptions, ServerStats, ServerStatsSnapshot, ServiceServer,
    StopSignal,
};
pub use types::{decode, decode_header, encode, CorrelationId, Envelope, RequesterGuid};

use crate::error::{Error, Result};
use crate::qos::QoS;

/// Request topic for a channel.
pub fn request_topic(name: &str) -> String {
    format!("{}/req", name)
}

/// Reply topic for a bidirectional channel.
pub fn reply_topic(name: &str) -> String {
    format!("{}/resp", name)
}

/// Delivery mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Fire-and-forget: no identifier, no reply.
    Oneway,
    /// Correlated request/response.
    Bidirectional,
}

/// Static description of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub mode: ChannelMode,
    pub request_topic: String,
    pub reply_topic: Option<String>,
    pub qos: QoS,
}

impl ChannelInfo {
    pub fn new(name: &str, mode: ChannelMode, qos: QoS) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            mode,
            request_topic: request_topic(name),
            reply_topic: match mode {
                ChannelMode::Oneway => None,
                ChannelMode::Bidirectional => Some(reply_topic(name)),
            },
            qos,
        })
    }

    pub fn is_bidirectional(&self) -> bool {
        self.mode == ChannelMode::Bidirectional
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidChannel("channel name is empty".into()));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(Error::InvalidChannel(format!(
            "'{}' must not start or end with '/'",
            name
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidChannel(format!(
            "'{}' contains whitespace",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::reliable_qos;

    #[test]
    fn test_topic_names() {
        let info = ChannelInfo::new("driver/drive", ChannelMode::Bidirectional, reliable_qos())
            .unwrap();
        assert_eq!(info.request_topic, "driver/drive/req");
        assert_eq!(info.reply_topic.as_deref(), Some("driver/drive/resp"));
        assert!(info.is_bidirectional());

        let info = ChannelInfo::new("driver/route", ChannelMode::Oneway, reliable_qos()).unwrap();
        assert_eq!(info.reply_topic, None);
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "/abs", "trailing/", "has space"] {
            assert!(
                matches!(
                    ChannelInfo::new(name, ChannelMode::Oneway, reliable_qos()),
                    Err(Error::InvalidChannel(_))
                ),
                "{:?} accepted",
                name
            );
        }
    }
}
