// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery policies for topics.
//!
//! A trimmed-down version of the DDS QoS model: reliability, durability and
//! history. Policies are assembled with fluent builders:
//!
//! ```rust
//! use simbus::qos::{QoS, History};
//! use std::time::Duration;
//!
//! let qos = QoS::reliable()
//!     .max_blocking_time(Duration::from_millis(200))
//!     .transient_local()
//!     .keep_last(1);
//! assert!(matches!(qos.history, History::KeepLast(1)));
//! ```

use std::time::Duration;

/// Default time a reliable writer may block waiting for reader room.
pub const DEFAULT_MAX_BLOCKING_TIME: Duration = Duration::from_secs(1);

/// History depth used by [`reliable_qos`] so concurrent requests are not evicted.
pub const DEFAULT_HISTORY_DEPTH: u32 = 32;

/// Reliability policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    /// Samples may be dropped when a reader cannot keep up.
    BestEffort,
    /// Samples are never dropped silently; a writer blocks up to
    /// `max_blocking_time` for room before failing.
    Reliable {
        /// Upper bound on how long `publish` may block.
        max_blocking_time: Duration,
    },
}

impl Reliability {
    /// Whether a reader with `requested` reliability accepts samples from a
    /// writer offering `self`.
    ///
    /// - Reliable writer -> any reader: compatible
    /// - BestEffort writer + BestEffort reader: compatible
    /// - BestEffort writer + Reliable reader: incompatible
    pub fn satisfies(&self, requested: &Reliability) -> bool {
        !matches!(
            (self, requested),
            (Reliability::BestEffort, Reliability::Reliable { .. })
        )
    }

    pub fn is_reliable(&self) -> bool {
        matches!(self, Reliability::Reliable { .. })
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::Reliable {
            max_blocking_time: DEFAULT_MAX_BLOCKING_TIME,
        }
    }
}

/// Durability policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Samples are delivered only to readers that exist when they are published.
    #[default]
    Volatile,
    /// The topic retains the last `history` samples of each writer and hands
    /// them to readers that join later.
    TransientLocal,
}

/// History policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum History {
    /// Keep last N samples (bounded queue, drops oldest)
    KeepLast(u32),
    /// Keep all samples within the transport's resource limits.
    KeepAll,
}

impl History {
    /// Queue bound implied by this history, `None` when unbounded.
    pub fn depth(&self) -> Option<usize> {
        match self {
            History::KeepLast(n) => Some((*n).max(1) as usize),
            History::KeepAll => None,
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::KeepLast(DEFAULT_HISTORY_DEPTH)
    }
}

/// Aggregated delivery policy for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QoS {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: History,
}

impl QoS {
    /// Reliable delivery with the default blocking time.
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::default(),
            ..Self::default()
        }
    }

    /// Best-effort delivery.
    pub fn best_effort() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            ..Self::default()
        }
    }

    /// Set how long a reliable writer may block. No effect on best-effort QoS.
    pub fn max_blocking_time(mut self, duration: Duration) -> Self {
        if let Reliability::Reliable { max_blocking_time } = &mut self.reliability {
            *max_blocking_time = duration;
        }
        self
    }

    /// Set KEEP_LAST history depth.
    pub fn keep_last(mut self, depth: u32) -> Self {
        self.history = History::KeepLast(depth);
        self
    }

    /// Set KEEP_ALL history policy.
    pub fn keep_all(mut self) -> Self {
        self.history = History::KeepAll;
        self
    }

    /// Set volatile durability.
    pub fn volatile(mut self) -> Self {
        self.durability = Durability::Volatile;
        self
    }

    /// Set transient-local durability.
    pub fn transient_local(mut self) -> Self {
        self.durability = Durability::TransientLocal;
        self
    }
}

/// Steady-state data channels: reliable, volatile, last 32 samples.
pub fn reliable_qos() -> QoS {
    QoS::reliable().volatile().keep_last(DEFAULT_HISTORY_DEPTH)
}

/// Session-start channels: reliable, transient-local, last sample only.
///
/// A request published before the server's reader exists is still delivered
/// once the server appears.
pub fn session_qos() -> QoS {
    QoS::reliable().transient_local().keep_last(1)
}
