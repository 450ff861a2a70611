// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant: the per-process entry point to a bus domain.

use crate::error::{Error, Result};
use crate::qos::QoS;
use crate::transport::{LocalDomain, TopicReader, TopicWriter, Transport};
use std::fmt;
use std::sync::Arc;

/// Highest valid domain id.
pub const MAX_DOMAIN_ID: u32 = 232;

/// A member of one bus domain, owning the transport every channel uses.
///
/// Share it with `Arc`; every client and server created from it keeps it alive.
pub struct Participant {
    name: String,
    domain_id: u32,
    transport: Arc<dyn Transport>,
}

/// Builder for configuring and creating a [`Participant`].
pub struct ParticipantBuilder {
    name: String,
    domain_id: u32,
    transport: Option<Arc<dyn Transport>>,
}

impl Participant {
    /// Create a participant on domain 0 with the process-wide local transport.
    ///
    /// # Example
    /// ```
    /// use simbus::Participant;
    /// let participant = Participant::new("controller")?;
    /// assert_eq!(participant.domain_id(), 0);
    /// # Ok::<(), simbus::Error>(())
    /// ```
    pub fn new(name: &str) -> Result<Arc<Self>> {
        Self::builder(name).build()
    }

    /// Create a participant on domain 0 bound to `transport`.
    pub fn with_transport(name: &str, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        Self::builder(name).with_transport(transport).build()
    }

    pub fn builder(name: &str) -> ParticipantBuilder {
        ParticipantBuilder {
            name: name.to_string(),
            domain_id: 0,
            transport: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn create_writer(&self, topic: &str, qos: &QoS) -> Result<Box<dyn TopicWriter>> {
        Ok(self.transport.create_writer(topic, qos)?)
    }

    pub fn create_reader(&self, topic: &str, qos: &QoS) -> Result<Box<dyn TopicReader>> {
        Ok(self.transport.create_reader(topic, qos)?)
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.name)
            .field("domain_id", &self.domain_id)
            .finish_non_exhaustive()
    }
}

impl ParticipantBuilder {
    pub fn domain_id(mut self, domain_id: u32) -> Self {
        self.domain_id = domain_id;
        self
    }

    /// Use an explicit transport instead of the shared local domain.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Arc<Participant>> {
        if self.domain_id > MAX_DOMAIN_ID {
            return Err(Error::InvalidDomainId(self.domain_id));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(LocalDomain::shared(self.domain_id)),
        };

        log::debug!(
            "participant '{}' joined domain {}",
            self.name,
            self.domain_id
        );

        Ok(Arc::new(Participant {
            name: self.name,
            domain_id: self.domain_id,
            transport,
        }))
    }
}
