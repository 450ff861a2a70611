// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller and vehicle-model records.

use super::common::{DynamicState, PoseAtTime, StateAtTime, Trajectory};
use serde::{Deserialize, Serialize};

/// Vehicle and controller configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VehicleAndControllerParams {
    pub rig_file: String,
    pub amend_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VdcSessionRequest {
    pub session_uuid: String,
    pub vehicle_and_controller_params: VehicleAndControllerParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VdcSessionCloseRequest {
    pub session_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunControllerAndVehicleModelRequest {
    pub session_uuid: String,
    /// Ego state at the current time, local frame.
    pub state: StateAtTime,
    pub planned_trajectory_in_rig: Trajectory,
    pub future_time_us: u64,
    /// Overwrite the model's velocity with `state.state` before stepping.
    pub coerce_dynamic_state: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunControllerAndVehicleModelResponse {
    pub pose_local_to_rig: PoseAtTime,
    pub pose_local_to_rig_estimated: PoseAtTime,
    pub dynamic_state: DynamicState,
    pub dynamic_state_estimated: DynamicState,
}
