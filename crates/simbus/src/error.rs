// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared by every simbus component.

use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by handlers, executors and resource constructors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for simbus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by channels, the session registry and the worker bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// No matching response arrived before the deadline.
    #[error("request on '{channel}' timed out after {after:?}")]
    Timeout { channel: String, after: Duration },

    #[error("session '{0}' already exists")]
    DuplicateSession(String),

    #[error("session '{0}' does not exist")]
    UnknownSession(String),

    /// Publish or poll failed at the transport.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A handler failed while processing one message.
    #[error("handler failed: {0}")]
    HandlerFailure(String),

    /// The worker failed to execute the batch this item belonged to.
    #[error("batch execution failed: {0}")]
    BatchFailure(String),

    /// The work item was discarded before execution.
    #[error("work item cancelled")]
    Cancelled,

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("channel '{0}' was shut down")]
    Shutdown(String),

    #[error("failed to construct resource for session '{session_id}': {source}")]
    ResourceConstruction {
        session_id: String,
        #[source]
        source: BoxError,
    },

    /// Domain ID out of range (0-232).
    #[error("invalid domain_id: {0} (must be 0-232)")]
    InvalidDomainId(u32),

    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::TransportUnavailable(_))
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::TransportUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Timeout {
            channel: "driver/drive".into(),
            after: Duration::from_millis(10),
        };
        assert!(err.to_string().contains("driver/drive"));
        assert!(err.to_string().contains("timed out"));

        let err = Error::DuplicateSession("s1".into());
        assert_eq!(err.to_string(), "session 's1' already exists");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::TransportUnavailable("closed".into()).is_retryable());
        assert!(Error::Timeout {
            channel: "c".into(),
            after: Duration::ZERO
        }
        .is_retryable());
        assert!(!Error::UnknownSession("s".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_transport_error_maps_to_unavailable() {
        let err: Error = TransportError::Unavailable("domain 7 closed".into()).into();
        assert!(matches!(err, Error::TransportUnavailable(msg) if msg.contains("domain 7")));
    }
}
