// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime-side clients of the three services.
//!
//! The runtime owns the rollout loop; these wrappers turn each step into
//! the right channel calls and do the pre-flight checks (version probe,
//! scene compatibility) before any session starts.

use crate::endpoints::{ChannelQos, ControllerEndpoints, DriverEndpoints, PhysicsEndpoints};
use crate::error::{Result, ServiceError};
use crate::types::{
    AvailableScenesRequest, DriveRequest, DriveResponse, DriveSessionCloseRequest,
    DriveSessionRequest, GroundTruthRequest, PhysicsGroundIntersectionRequest,
    PhysicsGroundIntersectionReturn, RolloutCameraImage, RolloutEgoTrajectory, RouteRequest,
    RunControllerAndVehicleModelRequest, RunControllerAndVehicleModelResponse, ShutdownRequest,
    VdcSessionCloseRequest, VdcSessionRequest, VehicleAndControllerParams, VersionRequest,
    VersionResponse,
};
use simbus::Participant;
use std::sync::Arc;
use std::time::Duration;

/// Scene id meaning "works with any scene".
pub const ANY_SCENE: &str = "*";

/// Scenes in `requested` that a service offering `available` cannot run.
///
/// A service listing [`ANY_SCENE`] accepts everything.
pub fn find_scene_incompatibilities(
    service: &str,
    available: &[String],
    requested: &[String],
) -> Vec<String> {
    if available.iter().any(|id| id == ANY_SCENE) {
        return Vec::new();
    }

    let mut sorted = available.to_vec();
    sorted.sort();
    requested
        .iter()
        .filter(|scene| !available.contains(*scene))
        .map(|scene| {
            format!(
                "Scene {} not available on {}. Available: {:?}",
                scene, service, sorted
            )
        })
        .collect()
}

pub struct ControllerClient {
    endpoints: ControllerEndpoints,
}

impl ControllerClient {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            endpoints: ControllerEndpoints::new(participant, qos, timeout)?,
        })
    }

    pub async fn start_session(
        &self,
        session_uuid: &str,
        params: VehicleAndControllerParams,
    ) -> Result<()> {
        self.endpoints
            .session_start
            .call(&VdcSessionRequest {
                session_uuid: session_uuid.to_string(),
                vehicle_and_controller_params: params,
            })
            .await?;
        Ok(())
    }

    pub fn close_session(&self, session_uuid: &str) -> Result<()> {
        self.endpoints.session_close.send(&VdcSessionCloseRequest {
            session_uuid: session_uuid.to_string(),
        })?;
        Ok(())
    }

    pub async fn run_controller_and_vehicle(
        &self,
        request: &RunControllerAndVehicleModelRequest,
    ) -> Result<RunControllerAndVehicleModelResponse> {
        Ok(self.endpoints.run.call(request).await?)
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        Ok(self.endpoints.version.call(&VersionRequest {}).await?)
    }

    /// The controller works with any scene.
    pub fn available_scenes(&self) -> Vec<String> {
        vec![ANY_SCENE.to_string()]
    }

    pub fn shutdown(&self, timestamp_us: u64) -> Result<()> {
        self.endpoints.shutdown.send(&ShutdownRequest { timestamp_us })?;
        Ok(())
    }
}

pub struct DriverClient {
    endpoints: DriverEndpoints,
}

impl DriverClient {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            endpoints: DriverEndpoints::new(participant, qos, timeout)?,
        })
    }

    pub async fn start_session(&self, request: &DriveSessionRequest) -> Result<()> {
        self.endpoints.session_start.call(request).await?;
        Ok(())
    }

    pub fn close_session(&self, session_uuid: &str) -> Result<()> {
        self.endpoints.session_close.send(&DriveSessionCloseRequest {
            session_uuid: session_uuid.to_string(),
        })?;
        Ok(())
    }

    pub fn submit_image(&self, image: &RolloutCameraImage) -> Result<()> {
        self.endpoints.image.send(image)?;
        Ok(())
    }

    pub fn submit_trajectory(&self, egomotion: &RolloutEgoTrajectory) -> Result<()> {
        self.endpoints.egomotion.send(egomotion)?;
        Ok(())
    }

    pub fn submit_route(&self, route: &RouteRequest) -> Result<()> {
        self.endpoints.route.send(route)?;
        Ok(())
    }

    pub fn submit_recording_ground_truth(&self, ground_truth: &GroundTruthRequest) -> Result<()> {
        self.endpoints.ground_truth.send(ground_truth)?;
        Ok(())
    }

    pub async fn drive(&self, request: &DriveRequest) -> Result<DriveResponse> {
        Ok(self.endpoints.drive.call(request).await?)
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        Ok(self.endpoints.version.call(&VersionRequest {}).await?)
    }

    /// The driver works with any scene.
    pub fn available_scenes(&self) -> Vec<String> {
        vec![ANY_SCENE.to_string()]
    }

    pub fn shutdown(&self, timestamp_us: u64) -> Result<()> {
        self.endpoints.shutdown.send(&ShutdownRequest { timestamp_us })?;
        Ok(())
    }
}

pub struct PhysicsClient {
    endpoints: PhysicsEndpoints,
}

impl PhysicsClient {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            endpoints: PhysicsEndpoints::new(participant, qos, timeout)?,
        })
    }

    pub async fn ground_intersection(
        &self,
        request: &PhysicsGroundIntersectionRequest,
    ) -> Result<PhysicsGroundIntersectionReturn> {
        Ok(self.endpoints.ground_intersection.call(request).await?)
    }

    pub async fn available_scenes(&self) -> Result<Vec<String>> {
        let response = self
            .endpoints
            .available_scenes
            .call(&AvailableScenesRequest {})
            .await?;
        Ok(response.scene_ids)
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        Ok(self.endpoints.version.call(&VersionRequest {}).await?)
    }

    pub fn shutdown(&self, timestamp_us: u64) -> Result<()> {
        self.endpoints.shutdown.send(&ShutdownRequest { timestamp_us })?;
        Ok(())
    }
}

/// Versions reported by each service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceVersions {
    pub controller: VersionResponse,
    pub driver: VersionResponse,
    pub physics: VersionResponse,
}

/// Clients of every service, sharing one participant.
pub struct ServiceClients {
    pub controller: ControllerClient,
    pub driver: DriverClient,
    pub physics: PhysicsClient,
}

impl ServiceClients {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            controller: ControllerClient::new(participant, qos, timeout)?,
            driver: DriverClient::new(participant, qos, timeout)?,
            physics: PhysicsClient::new(participant, qos, timeout)?,
        })
    }

    /// Ask every service for its version concurrently.
    pub async fn probe_versions(&self) -> Result<ServiceVersions> {
        let (controller, driver, physics) = tokio::try_join!(
            self.controller.version(),
            self.driver.version(),
            self.physics.version(),
        )?;
        for (name, version) in [
            ("controller", &controller),
            ("driver", &driver),
            ("physics", &physics),
        ] {
            tracing::info!(
                "Connected to {}: {} (git: {})",
                name,
                version.version_id,
                version.git_hash
            );
        }
        Ok(ServiceVersions {
            controller,
            driver,
            physics,
        })
    }

    /// Fail with `Incompatible` unless every service can run every scene.
    pub async fn validate_scenes(&self, scene_ids: &[String]) -> Result<()> {
        let physics = self.physics.available_scenes().await?;
        let mut problems = Vec::new();
        for (service, available) in [
            ("controller", self.controller.available_scenes()),
            ("driver", self.driver.available_scenes()),
            ("physics", physics),
        ] {
            let found = find_scene_incompatibilities(service, &available, scene_ids);
            if found.is_empty() {
                tracing::info!("Scenario validation passed on {}", service);
            } else {
                tracing::error!(
                    "Scenario validation failed on {}: {} issue(s)",
                    service,
                    found.len()
                );
            }
            problems.extend(found);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Incompatible(problems))
        }
    }

    /// Send a shutdown message to every service.
    pub fn shutdown_all(&self, timestamp_us: u64) -> Result<()> {
        self.controller.shutdown(timestamp_us)?;
        self.driver.shutdown(timestamp_us)?;
        self.physics.shutdown(timestamp_us)?;
        Ok(())
    }
}
