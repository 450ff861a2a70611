// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message records exchanged between the runtime and the services.
//!
//! All records are plain serde structs; channels encode them with the
//! simbus envelope codec.

pub mod camera;
pub mod common;
pub mod controller;
pub mod driver;
pub mod physics;

pub use camera::{AvailableCamera, CameraModel, CameraSpec, ShutterType};
pub use common::{
    Aabb, ApiVersion, AvailableScenesRequest, AvailableScenesResponse, DynamicState, Pose,
    PoseAtTime, Quat, SessionRequestStatus, ShutdownRequest, StateAtTime, Trajectory, Vec3,
    VersionRequest, VersionResponse, API_VERSION,
};
pub use controller::{
    RunControllerAndVehicleModelRequest, RunControllerAndVehicleModelResponse,
    VdcSessionCloseRequest, VdcSessionRequest, VehicleAndControllerParams,
};
pub use driver::{
    CameraImage, DebugInfo, DriveRequest, DriveResponse, DriveResponseDebugInfo,
    DriveSessionCloseRequest, DriveSessionRequest, GroundTruth, GroundTruthRequest,
    RolloutCameraImage, RolloutEgoTrajectory, RolloutSpec, Route, RouteRequest,
    VehicleDefinition,
};
pub use physics::{
    EgoData, GroundIntersectionStatus, OtherObject, PhysicsGroundIntersectionRequest,
    PhysicsGroundIntersectionReturn, PosePair, ReturnPose,
};
