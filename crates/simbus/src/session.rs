// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-service session registry.
//!
//! A session is registered by an explicit start, gets its backing resource
//! lazily on first use, and is removed by an explicit close. Start parameters
//! travel with the session until the resource is built from them.
//!
//! ```rust
//! use simbus::SessionRegistry;
//!
//! # async fn example() -> simbus::Result<()> {
//! let sessions: SessionRegistry<Vec<f64>, usize> = SessionRegistry::new("driver");
//! sessions.start_with("s1", 8)?;
//!
//! let history = sessions
//!     .get_or_create("s1", |capacity| async move {
//!         Ok::<_, std::io::Error>(Vec::with_capacity(capacity))
//!     })
//!     .await?;
//! assert!(history.capacity() >= 8);
//!
//! sessions.close("s1")?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BoxError, Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Lifecycle of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Started, no resource attached yet.
    Registered,
    /// Resource constructed and attached.
    Active,
}

struct Slot<R, P> {
    params: P,
    resource: OnceCell<Arc<R>>,
}

/// Map from session id to a lazily constructed resource `R`.
///
/// Concurrent first use of one session constructs its resource at most once;
/// the other callers wait for that construction and share its result.
pub struct SessionRegistry<R, P = ()> {
    service: String,
    sessions: Mutex<HashMap<String, Arc<Slot<R, P>>>>,
}

impl<R, P> SessionRegistry<R, P> {
    /// Create an empty registry; `service` only labels log lines.
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register `session_id` with its start parameters.
    pub fn start_with(&self, session_id: &str, params: P) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session_id) {
            return Err(Error::DuplicateSession(session_id.to_string()));
        }
        sessions.insert(
            session_id.to_string(),
            Arc::new(Slot {
                params,
                resource: OnceCell::new(),
            }),
        );
        log::info!("{}: session '{}' started", self.service, session_id);
        Ok(())
    }

    /// Remove `session_id` and release its resource.
    ///
    /// A caller still holding the resource keeps it alive until it lets go.
    pub fn close(&self, session_id: &str) -> Result<()> {
        let slot = self
            .sessions
            .lock()
            .remove(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;

        if slot.resource.initialized() {
            log::info!("{}: session '{}' closed", self.service, session_id);
        } else {
            log::info!(
                "{}: session '{}' closed before first use",
                self.service,
                session_id
            );
        }
        Ok(())
    }

    /// Resource of a started session, `None` while not yet constructed.
    pub fn get(&self, session_id: &str) -> Result<Option<Arc<R>>> {
        let slot = self.slot(session_id)?;
        Ok(slot.resource.get().cloned())
    }

    pub fn state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.lock().get(session_id).map(|slot| {
            if slot.resource.initialized() {
                SessionState::Active
            } else {
                SessionState::Registered
            }
        })
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Registered session ids, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn slot(&self, session_id: &str) -> Result<Arc<Slot<R, P>>> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))
    }
}

impl<R, P: Default> SessionRegistry<R, P> {
    /// Register `session_id` with default start parameters.
    pub fn start(&self, session_id: &str) -> Result<()> {
        self.start_with(session_id, P::default())
    }
}

impl<R, P: Clone> SessionRegistry<R, P> {
    pub fn params(&self, session_id: &str) -> Result<P> {
        Ok(self.slot(session_id)?.params.clone())
    }

    /// Return the session's resource, constructing it from the start
    /// parameters on first use.
    ///
    /// Fails with `UnknownSession` if the session was never started. A failed
    /// construction leaves the session registered so a later call may retry.
    pub async fn get_or_create<F, Fut, E>(&self, session_id: &str, constructor: F) -> Result<Arc<R>>
    where
        F: FnOnce(P) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Into<BoxError>,
    {
        let slot = self.slot(session_id)?;
        let resource = slot
            .resource
            .get_or_try_init(|| async {
                log::debug!(
                    "{}: constructing resource for session '{}'",
                    self.service,
                    session_id
                );
                match constructor(slot.params.clone()).await {
                    Ok(resource) => Ok(Arc::new(resource)),
                    Err(e) => Err(Error::ResourceConstruction {
                        session_id: session_id.to_string(),
                        source: e.into(),
                    }),
                }
            })
            .await?;
        Ok(resource.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_duplicate_start_and_double_close() {
        let registry: SessionRegistry<u32> = SessionRegistry::new("svc");
        registry.start("s1").unwrap();
        assert!(matches!(
            registry.start("s1"),
            Err(Error::DuplicateSession(id)) if id == "s1"
        ));

        registry.close("s1").unwrap();
        assert!(matches!(
            registry.close("s1"),
            Err(Error::UnknownSession(id)) if id == "s1"
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_create_requires_start() {
        let registry: SessionRegistry<u32> = SessionRegistry::new("svc");
        let err = registry
            .get_or_create("ghost", |_| async { Ok::<_, BoxError>(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
        assert!(!registry.contains("ghost"));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let registry: SessionRegistry<String, String> = SessionRegistry::new("svc");
        registry.start_with("s1", "params".into()).unwrap();
        assert_eq!(registry.state("s1"), Some(SessionState::Registered));
        assert!(registry.get("s1").unwrap().is_none());
        assert_eq!(registry.params("s1").unwrap(), "params");

        let value = registry
            .get_or_create("s1", |p| async move { Ok::<_, BoxError>(p.to_uppercase()) })
            .await
            .unwrap();
        assert_eq!(*value, "PARAMS");
        assert_eq!(registry.state("s1"), Some(SessionState::Active));
        assert_eq!(registry.get("s1").unwrap().as_deref(), Some(&"PARAMS".to_string()));
        assert_eq!(registry.state("other"), None);
    }

    #[tokio::test]
    async fn test_failed_construction_can_retry() {
        let registry: SessionRegistry<u32> = SessionRegistry::new("svc");
        registry.start("s1").unwrap();

        let err = registry
            .get_or_create("s1", |_| async { Err::<u32, _>("backend offline") })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceConstruction { ref session_id, .. } if session_id == "s1"
        ));
        assert_eq!(registry.state("s1"), Some(SessionState::Registered));

        let value = registry
            .get_or_create("s1", |_| async { Ok::<_, BoxError>(9) })
            .await
            .unwrap();
        assert_eq!(*value, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_constructs_once() {
        let registry = Arc::new(SessionRegistry::<usize>::new("svc"));
        registry.start("s1").unwrap();
        let constructed = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let constructed = constructed.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .get_or_create("s1", |_| async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, BoxError>(constructed.fetch_add(1, Ordering::SeqCst) + 100)
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut resources = Vec::new();
        for task in tasks {
            resources.push(task.await.unwrap());
        }

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(resources.iter().all(|r| Arc::ptr_eq(r, &resources[0])));
        assert_eq!(*resources[0], 100);
    }

    #[test]
    fn test_session_ids_sorted() {
        let registry: SessionRegistry<()> = SessionRegistry::new("svc");
        for id in ["b", "c", "a"] {
            registry.start(id).unwrap();
        }
        assert_eq!(registry.session_ids(), vec!["a", "b", "c"]);
        assert_eq!(registry.len(), 3);
    }
}
