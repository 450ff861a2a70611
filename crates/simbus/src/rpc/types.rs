// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Correlation identity and wire envelope.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static GUID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// 16-byte identity of one requesting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterGuid(pub [u8; 16]);

impl RequesterGuid {
    /// Generate a GUID unique within and across processes.
    ///
    /// Layout: 8 bytes wall-clock nanos, 4 bytes process id, 4 bytes
    /// process-wide counter.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let counter = GUID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&nanos.to_le_bytes());
        bytes[8..12].copy_from_slice(&std::process::id().to_le_bytes());
        bytes[12..16].copy_from_slice(&counter.to_le_bytes());
        Self(bytes)
    }

    pub fn zero() -> Self {
        Self([0u8; 16])
    }
}

impl fmt::Display for RequesterGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Token linking a request to its response.
///
/// Combines the requesting client's GUID with that client's sequence number,
/// so identifiers never collide between clients sharing a reply topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId {
    pub requester: RequesterGuid,
    pub sequence: u64,
}

impl CorrelationId {
    pub fn new(requester: RequesterGuid, sequence: u64) -> Self {
        Self {
            requester,
            sequence,
        }
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.requester, self.sequence)
    }
}

/// Message as it travels on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    pub body: T,
}

/// Header-only view; the body is skipped.
#[derive(Deserialize)]
struct EnvelopeHeader {
    #[serde(default)]
    correlation_id: Option<CorrelationId>,
}

/// Serialize `body` into an envelope tagged with `correlation_id`.
pub fn encode<T: Serialize>(correlation_id: Option<CorrelationId>, body: &T) -> Result<Vec<u8>> {
    let envelope = Envelope {
        correlation_id,
        body,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decode only the correlation identifier of an envelope.
pub fn decode_header(bytes: &[u8]) -> Result<Option<CorrelationId>> {
    let header: EnvelopeHeader = serde_json::from_slice(bytes)?;
    Ok(header.correlation_id)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<Envelope<T>> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        op: String,
    }

    #[test]
    fn test_generated_guids_are_distinct() {
        let guids: HashSet<_> = (0..64).map(|_| RequesterGuid::generate()).collect();
        assert_eq!(guids.len(), 64);
        assert_ne!(RequesterGuid::generate(), RequesterGuid::zero());
    }

    #[test]
    fn test_header_decodes_without_body_type() {
        let id = CorrelationId::new(RequesterGuid::generate(), 42);
        let bytes = encode(Some(id), &Ping { op: "ping".into() }).unwrap();

        assert_eq!(decode_header(&bytes).unwrap(), Some(id));
        let envelope: Envelope<Ping> = decode(&bytes).unwrap();
        assert_eq!(envelope.body.op, "ping");
    }

    #[test]
    fn test_oneway_envelope_has_no_id() {
        let bytes = encode(None, &Ping { op: "x".into() }).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("correlation_id"));
        assert_eq!(decode_header(&bytes).unwrap(), None);
    }

    #[test]
    fn test_body_mismatch_still_yields_header() {
        let id = CorrelationId::new(RequesterGuid::zero(), 1);
        let bytes = encode(Some(id), &42u32).unwrap();

        assert_eq!(decode_header(&bytes).unwrap(), Some(id));
        assert!(decode::<Ping>(&bytes).is_err());
    }

    #[test]
    fn test_garbage_is_codec_error() {
        assert!(matches!(
            decode_header(b"not json"),
            Err(crate::Error::Codec(_))
        ));
    }
}
