// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Closed-loop rollouts through all three services.

use simbus::{BoxError, Error, LocalDomain, Participant};
use simbus_services::config::SceneConfig;
use simbus_services::controller::KinematicVehicleFactory;
use simbus_services::driver::{PolicyInput, Prediction};
use simbus_services::endpoints::ChannelQos;
use simbus_services::physics::FlatGroundScenes;
use simbus_services::runtime::DriverClient;
use simbus_services::types::{
    AvailableCamera, DriveSessionRequest, RolloutSpec, VehicleDefinition,
};
use simbus_services::{
    Backends, ConstantVelocityPolicy, DriverService, DrivingPolicy, ServiceError, Testbed,
    TestbedConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn small_config(sessions: usize, steps: usize) -> TestbedConfig {
    let mut config = TestbedConfig {
        name: "it".into(),
        request_timeout_ms: 2_000,
        ..TestbedConfig::default()
    };
    config.rollout.sessions = sessions;
    config.rollout.steps = steps;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rollouts_complete() {
    let testbed = Testbed::new(small_config(3, 30)).expect("Failed to build testbed");
    let reports = testbed.run().await.expect("Rollouts failed");

    assert_eq!(reports.len(), 3);
    let names: Vec<&str> = reports.iter().map(|r| r.session_uuid.as_str()).collect();
    assert_eq!(names, vec!["it-0", "it-1", "it-2"]);

    for report in &reports {
        assert_eq!(report.steps, 30);
        assert!(report.empty_drives < report.steps, "{:?}", report);
        assert!(report.distance > 0.0, "{:?}", report);
        assert_eq!(report.final_pose.timestamp_us, 30 * 100_000);
        assert_eq!(report.final_pose.pose.vec.z, 0.0);
    }

    let stats = testbed.driver().worker_stats();
    assert!(stats.items > 0);
    assert_eq!(stats.failed_batches, 0);
    // One scene, loaded once for every session.
    assert_eq!(testbed.physics().scene_loads(), 1);
}

/// With two frames of context the first drive can never be answered, so
/// every rollout starts with a held step.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_first_drive_keeps_speed() {
    let mut config = small_config(1, 10);
    config.driver.context_length = 2;

    let reports = Testbed::new(config).unwrap().run().await.unwrap();
    let report = &reports[0];
    assert!(report.empty_drives >= 1, "{:?}", report);
    assert!(report.distance > 0.0, "{:?}", report);
    assert!(report.final_speed > 0.0, "{:?}", report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rollout_follows_scene_ground() {
    let mut config = small_config(1, 10);
    config.physics.scenes = vec![SceneConfig {
        id: "plateau".into(),
        ground_height: 1.5,
    }];
    config.rollout.scene_id = "plateau".into();

    let reports = Testbed::new(config).unwrap().run().await.unwrap();
    assert_eq!(reports[0].final_pose.pose.vec.z, 1.5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_scene_rejected_before_sessions() {
    let mut config = small_config(2, 5);
    config.rollout.scene_id = "atlantis".into();

    let testbed = Testbed::new(config).unwrap();
    let err = testbed.run().await.unwrap_err();
    match err {
        ServiceError::Incompatible(problems) => {
            assert_eq!(problems.len(), 1);
            assert!(problems[0].contains("atlantis"));
            assert!(problems[0].contains("physics"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(testbed.driver().sessions().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_versions_probed() {
    let testbed = Testbed::new(small_config(1, 1)).unwrap();
    let handle = {
        let driver = testbed.driver().clone();
        tokio::spawn(async move { driver.run().await })
    };

    let version = testbed.clients().driver.version().await.unwrap();
    assert!(version.version_id.starts_with("constant-velocity-driver-"));

    testbed.clients().driver.shutdown(0).unwrap();
    handle.await.unwrap();
}

struct FailingPolicy;

impl DrivingPolicy for FailingPolicy {
    fn name(&self) -> &str {
        "failing"
    }

    fn output_frequency_hz(&self) -> f64 {
        10.0
    }

    fn predict_batch(&mut self, _inputs: &[PolicyInput]) -> Result<Vec<Prediction>, BoxError> {
        Err("model weights missing".into())
    }
}

/// A failing batch fails the drive handler, so no reply is sent and the
/// runtime times out.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_policy_failure_times_out_rollout() {
    let mut config = small_config(2, 5);
    config.request_timeout_ms = 300;
    let backends = Backends {
        policy: Box::new(FailingPolicy),
        vehicle_factory: Arc::new(KinematicVehicleFactory),
        scenes: Arc::new(FlatGroundScenes::new(&config.physics.scenes)),
    };

    let testbed = Testbed::with_backends(config, backends).unwrap();
    let err = testbed.run().await.unwrap_err();
    assert!(
        matches!(
            err,
            ServiceError::Bus(Error::Timeout { ref channel, .. }) if channel == "driver/drive"
        ),
        "unexpected error: {}",
        err
    );
    assert!(testbed.driver().worker_stats().failed_batches > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_session_start_gets_no_reply() {
    let participant =
        Participant::with_transport("dup", Arc::new(LocalDomain::new(0))).unwrap();
    let qos = ChannelQos::default();
    let config = TestbedConfig::default().driver;
    let policy = ConstantVelocityPolicy::new(config.output_frequency_hz, config.horizon_steps);
    let service = Arc::new(
        DriverService::new(&participant, &qos, config, Box::new(policy)).unwrap(),
    );
    let serving = service.clone();
    let handle = tokio::spawn(async move { serving.run().await });

    let client = DriverClient::new(&participant, &qos, Some(Duration::from_millis(300))).unwrap();
    let request = DriveSessionRequest {
        session_uuid: "dup-1".into(),
        random_seed: 0,
        debug_info: None,
        rollout_spec: RolloutSpec {
            vehicle: Some(VehicleDefinition {
                available_cameras: vec![AvailableCamera::pinhole("camera_front_wide", 64, 48)],
            }),
        },
    };

    client.start_session(&request).await.unwrap();
    let err = client.start_session(&request).await.unwrap_err();
    assert!(matches!(err, ServiceError::Bus(Error::Timeout { .. })));
    assert_eq!(service.sessions().len(), 1);

    client.shutdown(0).unwrap();
    handle.await.unwrap();
}
