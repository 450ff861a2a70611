// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driving-policy records: session setup, observations and drive requests.

use super::camera::AvailableCamera;
use super::common::{DynamicState, Trajectory, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleDefinition {
    pub available_cameras: Vec<AvailableCamera>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RolloutSpec {
    pub vehicle: Option<VehicleDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebugInfo {
    pub scene_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveSessionRequest {
    pub session_uuid: String,
    pub random_seed: u64,
    pub debug_info: Option<DebugInfo>,
    pub rollout_spec: RolloutSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveSessionCloseRequest {
    pub session_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CameraImage {
    pub frame_start_us: u64,
    pub frame_end_us: u64,
    pub image_bytes: Vec<u8>,
    pub logical_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RolloutCameraImage {
    pub session_uuid: String,
    pub camera_image: CameraImage,
}

/// Ego pose observation (exactly one pose) with its dynamic state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RolloutEgoTrajectory {
    pub session_uuid: String,
    pub trajectory: Trajectory,
    pub dynamic_state: Option<DynamicState>,
}

/// Route waypoints in the rig frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Route {
    pub timestamp_us: u64,
    pub waypoints: Vec<Vec3>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouteRequest {
    pub session_uuid: String,
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroundTruth {
    pub timestamp_us: u64,
    pub trajectory: Trajectory,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroundTruthRequest {
    pub session_uuid: String,
    pub ground_truth: GroundTruth,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveRequest {
    pub session_uuid: String,
    pub time_now_us: u64,
    pub time_query_us: u64,
    pub renderer_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveResponseDebugInfo {
    /// JSON-encoded policy diagnostics.
    pub unstructured_debug_info: Vec<u8>,
    pub sampled_trajectories: Vec<Trajectory>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveResponse {
    pub trajectory: Trajectory,
    pub debug_info: DriveResponseDebugInfo,
}

impl DriveResponse {
    /// Response for a session that cannot drive yet.
    pub fn empty() -> Self {
        Self::default()
    }
}
