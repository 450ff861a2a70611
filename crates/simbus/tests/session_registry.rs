// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Session lifecycle as seen by a service handling concurrent requests.

use simbus::{BoxError, Error, SessionRegistry, SessionState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Backend {
    id: usize,
    vehicle: String,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_are_independent() {
    let registry = Arc::new(SessionRegistry::<Backend, String>::new("controller"));
    let built = Arc::new(AtomicUsize::new(0));

    for (session, vehicle) in [("a", "sedan"), ("b", "truck")] {
        registry
            .start_with(session, vehicle.to_string())
            .expect("start failed");
    }

    let mut tasks = Vec::new();
    for i in 0..20 {
        let registry = registry.clone();
        let built = built.clone();
        let session = if i % 2 == 0 { "a" } else { "b" };
        tasks.push(tokio::spawn(async move {
            registry
                .get_or_create(session, |vehicle| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, BoxError>(Backend {
                        id: built.fetch_add(1, Ordering::SeqCst),
                        vehicle,
                    })
                })
                .await
                .map(|backend| (session, backend))
        }));
    }

    let mut ids_a = Vec::new();
    let mut ids_b = Vec::new();
    for task in tasks {
        let (session, backend) = task.await.expect("task panicked").expect("get_or_create");
        match session {
            "a" => {
                assert_eq!(backend.vehicle, "sedan");
                ids_a.push(backend.id);
            }
            _ => {
                assert_eq!(backend.vehicle, "truck");
                ids_b.push(backend.id);
            }
        }
    }

    assert_eq!(built.load(Ordering::SeqCst), 2);
    assert!(ids_a.iter().all(|id| *id == ids_a[0]));
    assert!(ids_b.iter().all(|id| *id == ids_b[0]));
    assert_ne!(ids_a[0], ids_b[0]);
}

#[tokio::test]
async fn test_close_releases_and_does_not_recreate() {
    let registry = SessionRegistry::<Backend, String>::new("controller");
    registry.start_with("s1", "sedan".into()).expect("start");

    let backend = registry
        .get_or_create("s1", |vehicle| async move {
            Ok::<_, BoxError>(Backend { id: 0, vehicle })
        })
        .await
        .expect("construct");
    assert_eq!(registry.state("s1"), Some(SessionState::Active));
    assert_eq!(Arc::strong_count(&backend), 2);

    registry.close("s1").expect("close");
    assert_eq!(Arc::strong_count(&backend), 1);

    let err = registry
        .get_or_create("s1", |vehicle| async move {
            Ok::<_, BoxError>(Backend { id: 1, vehicle })
        })
        .await
        .err()
        .expect("closed session must not be recreated");
    assert!(matches!(err, Error::UnknownSession(_)));
    assert!(!err.is_retryable());

    // Restart after close is a fresh session.
    registry.start_with("s1", "truck".into()).expect("restart");
    assert_eq!(registry.state("s1"), Some(SessionState::Registered));
}

#[test]
fn test_close_unused_session() {
    let registry: SessionRegistry<Backend> = SessionRegistry::new("driver");
    registry.start("idle").expect("start");
    registry.close("idle").expect("closing an unused session is valid");
    assert!(matches!(registry.close("idle"), Err(Error::UnknownSession(_))));
}
