// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process testbed: the three services plus a runtime driving rollouts,
//! all on one [`LocalDomain`].
//!
//! Each rollout step publishes the observations, asks the driver for a
//! plan, advances the vehicle through the controller and lets physics put
//! the result back on the ground:
//!
//! ```text
//! runtime --route/image/egomotion--> driver
//! runtime --drive------------------> driver      (local trajectory)
//! runtime --run--------------------> controller  (plan in rig frame)
//! runtime --ground_intersection----> physics     (z from the scene)
//! ```

use crate::config::TestbedConfig;
use crate::controller::{ControllerService, KinematicVehicleFactory, VehicleModelFactory};
use crate::driver::{ConstantVelocityPolicy, DriverService, DrivingPolicy};
use crate::error::{Result, ServiceError};
use crate::physics::{FlatGroundScenes, PhysicsService, SceneLoader};
use crate::runtime::{ServiceClients, ServiceVersions};
use crate::types::{
    Aabb, AvailableCamera, CameraImage, DebugInfo, DriveRequest, DriveSessionRequest, DynamicState,
    EgoData, GroundIntersectionStatus, PhysicsGroundIntersectionRequest, Pose, PoseAtTime,
    PosePair, RolloutCameraImage, RolloutEgoTrajectory, RolloutSpec, Route, RouteRequest,
    RunControllerAndVehicleModelRequest, StateAtTime, Trajectory, Vec3,
    VehicleAndControllerParams, VehicleDefinition,
};
use simbus::{LocalDomain, Participant, Transport};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Ego extents used for ground queries (m).
const EGO_AABB: Aabb = Aabb {
    size_x: 4.5,
    size_y: 2.0,
    size_z: 1.6,
};

/// Lateral offsets (m) of the synthetic routes, cycled across sessions.
const ROUTE_OFFSETS: [f64; 3] = [0.0, 5.0, -5.0];

/// Outcome of one rollout.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutReport {
    pub session_uuid: String,
    pub steps: usize,
    /// Steps where the driver had no plan and the vehicle held position.
    pub empty_drives: usize,
    /// Planar distance travelled (m).
    pub distance: f64,
    pub final_pose: PoseAtTime,
    pub final_speed: f64,
}

/// Backends the services run with.
pub struct Backends {
    pub policy: Box<dyn DrivingPolicy>,
    pub vehicle_factory: Arc<dyn VehicleModelFactory>,
    pub scenes: Arc<dyn SceneLoader>,
}

impl Backends {
    /// Reference backends: constant-velocity policy, kinematic vehicle and
    /// the configured flat-ground scenes.
    pub fn from_config(config: &TestbedConfig) -> Self {
        Self {
            policy: Box::new(ConstantVelocityPolicy::new(
                config.driver.output_frequency_hz,
                config.driver.horizon_steps,
            )),
            vehicle_factory: Arc::new(KinematicVehicleFactory),
            scenes: Arc::new(FlatGroundScenes::new(&config.physics.scenes)),
        }
    }
}

/// Services and runtime wired over one in-process domain.
pub struct Testbed {
    config: TestbedConfig,
    domain: Arc<LocalDomain>,
    controller: Arc<ControllerService>,
    driver: Arc<DriverService>,
    physics: Arc<PhysicsService>,
    clients: ServiceClients,
}

impl Testbed {
    pub fn new(config: TestbedConfig) -> Result<Self> {
        let backends = Backends::from_config(&config);
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: TestbedConfig, backends: Backends) -> Result<Self> {
        config.validate()?;

        let domain = Arc::new(LocalDomain::new(config.domain_id));
        let participant = |name: &str| -> Result<Arc<Participant>> {
            let transport: Arc<dyn Transport> = domain.clone();
            Ok(Participant::builder(name)
                .domain_id(config.domain_id)
                .with_transport(transport)
                .build()?)
        };
        let qos = config.channel_qos();

        let controller = ControllerService::new(
            &participant("controller")?,
            &qos,
            backends.vehicle_factory,
        )?;
        let driver = DriverService::new(
            &participant("driver")?,
            &qos,
            config.driver.clone(),
            backends.policy,
        )?;
        let physics = PhysicsService::new(
            &participant("physics")?,
            &qos,
            backends.scenes,
            config.physics.cache_size,
        )?;
        let clients =
            ServiceClients::new(&participant("runtime")?, &qos, config.request_timeout())?;

        Ok(Self {
            config,
            domain,
            controller: Arc::new(controller),
            driver: Arc::new(driver),
            physics: Arc::new(physics),
            clients,
        })
    }

    pub fn config(&self) -> &TestbedConfig {
        &self.config
    }

    pub fn clients(&self) -> &ServiceClients {
        &self.clients
    }

    pub fn driver(&self) -> &Arc<DriverService> {
        &self.driver
    }

    pub fn physics(&self) -> &Arc<PhysicsService> {
        &self.physics
    }

    /// Spawn the serve loops of every service.
    fn spawn_services(&self) -> Vec<JoinHandle<()>> {
        let controller = self.controller.clone();
        let driver = self.driver.clone();
        let physics = self.physics.clone();
        vec![
            tokio::spawn(async move { controller.run().await }),
            tokio::spawn(async move { driver.run().await }),
            tokio::spawn(async move { physics.run().await }),
        ]
    }

    /// Run the configured rollouts and shut the services down.
    ///
    /// Services are shut down through their shutdown channels even when a
    /// rollout fails.
    pub async fn run(&self) -> Result<Vec<RolloutReport>> {
        let services = self.spawn_services();
        let outcome = self.run_rollouts().await;

        let end_us = self.config.rollout.steps as u64 * self.config.rollout.step_us;
        if let Err(e) = self.clients.shutdown_all(end_us) {
            tracing::warn!("Shutdown messages not delivered: {}", e);
            self.controller.stop_signal().stop();
            self.driver.stop_signal().stop();
            self.physics.stop_signal().stop();
        }
        for handle in services {
            if let Err(e) = handle.await {
                tracing::error!("Service task failed: {}", e);
            }
        }
        outcome
    }

    async fn run_rollouts(&self) -> Result<Vec<RolloutReport>> {
        let versions: ServiceVersions = self.clients.probe_versions().await?;
        tracing::debug!("Service versions: {:?}", versions);
        self.clients
            .validate_scenes(std::slice::from_ref(&self.config.rollout.scene_id))
            .await?;

        // Session-start channels keep only the latest sample, so starts go
        // one at a time.
        let uuids: Vec<String> = (0..self.config.rollout.sessions)
            .map(|i| format!("{}-{}", self.config.name, i))
            .collect();
        for (i, uuid) in uuids.iter().enumerate() {
            if let Err(e) = self.start_session(i, uuid).await {
                // The failed id may be open on the driver already.
                self.close_sessions(&uuids[..=i]);
                return Err(e);
            }
        }

        let reports = futures_util::future::try_join_all(
            uuids
                .iter()
                .enumerate()
                .map(|(i, uuid)| self.rollout(uuid, ROUTE_OFFSETS[i % ROUTE_OFFSETS.len()])),
        )
        .await;

        self.close_sessions(&uuids);
        reports
    }

    fn close_sessions(&self, uuids: &[String]) {
        for uuid in uuids {
            if let Err(e) = self.clients.driver.close_session(uuid) {
                tracing::warn!("Closing driver session {} failed: {}", uuid, e);
            }
            if let Err(e) = self.clients.controller.close_session(uuid) {
                tracing::warn!("Closing controller session {} failed: {}", uuid, e);
            }
        }
    }

    async fn start_session(&self, index: usize, uuid: &str) -> Result<()> {
        tracing::info!("Starting rollout session {}", uuid);
        let cameras = self
            .config
            .driver
            .use_cameras
            .iter()
            .map(|id| AvailableCamera::pinhole(id, 320, 240))
            .collect();

        self.clients
            .driver
            .start_session(&DriveSessionRequest {
                session_uuid: uuid.to_string(),
                random_seed: self.config.rollout.random_seed + index as u64,
                debug_info: Some(DebugInfo {
                    scene_id: self.config.rollout.scene_id.clone(),
                }),
                rollout_spec: RolloutSpec {
                    vehicle: Some(VehicleDefinition {
                        available_cameras: cameras,
                    }),
                },
            })
            .await?;
        self.clients
            .controller
            .start_session(
                uuid,
                VehicleAndControllerParams {
                    rig_file: format!("{}.rig.json", self.config.rollout.scene_id),
                    amend_files: Vec::new(),
                },
            )
            .await
    }

    /// One closed-loop rollout. Observations are oneway, so a drive may be
    /// answered before the driver has seen this step's observations.
    async fn rollout(&self, uuid: &str, route_offset: f64) -> Result<RolloutReport> {
        let rollout = &self.config.rollout;
        let clients = &self.clients;

        let mut current = PoseAtTime::new(Pose::default(), 0);
        let mut state = DynamicState {
            linear_velocity: Vec3::new(rollout.initial_speed, 0.0, 0.0),
            ..DynamicState::default()
        };
        let mut empty_drives = 0;
        let mut distance = 0.0;

        for step in 0..rollout.steps {
            let now_us = step as u64 * rollout.step_us;
            let future_us = now_us + rollout.step_us;

            clients.driver.submit_route(&RouteRequest {
                session_uuid: uuid.to_string(),
                route: Route {
                    timestamp_us: now_us,
                    waypoints: vec![
                        Vec3::new(10.0, route_offset * 0.5, 0.0),
                        Vec3::new(20.0, route_offset, 0.0),
                    ],
                },
            })?;
            for camera in &self.config.driver.use_cameras {
                clients.driver.submit_image(&RolloutCameraImage {
                    session_uuid: uuid.to_string(),
                    camera_image: CameraImage {
                        frame_start_us: now_us.saturating_sub(rollout.step_us / 2),
                        frame_end_us: now_us,
                        image_bytes: synthetic_image(step),
                        logical_id: camera.clone(),
                    },
                })?;
            }
            clients.driver.submit_trajectory(&RolloutEgoTrajectory {
                session_uuid: uuid.to_string(),
                trajectory: Trajectory::new(vec![current]),
                dynamic_state: Some(state),
            })?;

            let drive = clients
                .driver
                .drive(&DriveRequest {
                    session_uuid: uuid.to_string(),
                    time_now_us: now_us,
                    time_query_us: future_us,
                    renderer_data: Vec::new(),
                })
                .await?;

            // The controller wants the plan relative to the vehicle.
            let held = drive.trajectory.is_empty();
            let plan = if held {
                empty_drives += 1;
                Trajectory::new(vec![PoseAtTime::new(Pose::default(), now_us)])
            } else {
                Trajectory::new(
                    drive
                        .trajectory
                        .poses
                        .iter()
                        .map(|p| PoseAtTime::new(p.pose.relative_to(&current.pose), p.timestamp_us))
                        .collect(),
                )
            };

            let response = clients
                .controller
                .run_controller_and_vehicle(&RunControllerAndVehicleModelRequest {
                    session_uuid: uuid.to_string(),
                    state: StateAtTime {
                        timestamp_us: now_us,
                        pose: current.pose,
                        state,
                    },
                    planned_trajectory_in_rig: plan,
                    future_time_us: future_us,
                    coerce_dynamic_state: false,
                })
                .await?;

            let moved = response.pose_local_to_rig.pose;
            let grounded = clients
                .physics
                .ground_intersection(&PhysicsGroundIntersectionRequest {
                    scene_id: rollout.scene_id.clone(),
                    now_us,
                    future_us,
                    ego_data: Some(EgoData {
                        aabb: EGO_AABB,
                        pose_pair: PosePair {
                            now_pose: current.pose,
                            future_pose: moved,
                        },
                    }),
                    other_objects: Vec::new(),
                })
                .await?;
            let next = match grounded.ego_pose {
                Some(ego) if ego.status == GroundIntersectionStatus::SuccessfulUpdate => ego.pose,
                Some(ego) => {
                    tracing::warn!(
                        "{}: ground intersection at {}us returned {:?}, keeping controller pose",
                        uuid,
                        future_us,
                        ego.status
                    );
                    moved
                }
                None => {
                    return Err(ServiceError::Backend(format!(
                        "physics returned no ego pose for {}",
                        uuid
                    )))
                }
            };

            distance += Vec3::new(
                next.vec.x - current.pose.vec.x,
                next.vec.y - current.pose.vec.y,
                0.0,
            )
            .planar_norm();
            current = PoseAtTime::new(next, future_us);
            // Holding position says nothing about the speed the driver
            // should keep planning with.
            if !held {
                state = response.dynamic_state;
            }
        }

        tracing::info!(
            "Rollout {} finished: {:.1} m, {} empty drives",
            uuid,
            distance,
            empty_drives
        );
        Ok(RolloutReport {
            session_uuid: uuid.to_string(),
            steps: rollout.steps,
            empty_drives,
            distance,
            final_pose: current,
            final_speed: state.speed(),
        })
    }

    /// Samples dropped by the domain so far.
    pub fn dropped_samples(&self) -> u64 {
        self.domain.dropped_samples()
    }
}

/// Placeholder camera payload that changes every step.
fn synthetic_image(step: usize) -> Vec<u8> {
    (0..64u8).map(|i| i.wrapping_add(step as u8)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_image_varies() {
        assert_ne!(synthetic_image(0), synthetic_image(1));
        assert_eq!(synthetic_image(3).len(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_start_closes_started_sessions() {
        let mut config = TestbedConfig {
            name: "leak".into(),
            request_timeout_ms: 300,
            ..TestbedConfig::default()
        };
        config.rollout.sessions = 3;
        let testbed = Testbed::new(config).unwrap();
        let services = testbed.spawn_services();

        // An existing session under the second id makes that start time out.
        testbed.start_session(1, "leak-1").await.unwrap();
        let err = testbed.run_rollouts().await.unwrap_err();
        assert!(
            matches!(err, ServiceError::Bus(simbus::Error::Timeout { .. })),
            "unexpected error: {}",
            err
        );

        // Closes are oneway; give the driver time to apply them.
        for _ in 0..100 {
            if testbed.driver().sessions().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(testbed.driver().sessions().is_empty());

        testbed.clients().shutdown_all(0).unwrap();
        for handle in services {
            handle.await.unwrap();
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = TestbedConfig::default();
        config.rollout.sessions = 0;
        assert!(matches!(
            Testbed::new(config),
            Err(ServiceError::Config(_))
        ));
    }
}
