// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ground-intersection records.

use super::common::{Aabb, Pose};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PosePair {
    pub now_pose: Pose,
    pub future_pose: Pose,
}

/// Ego vehicle extents and motion over one step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EgoData {
    pub aabb: Aabb,
    pub pose_pair: PosePair,
}

/// Another actor's extents and motion over one step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OtherObject {
    pub aabb: Aabb,
    pub pose_pair: PosePair,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicsGroundIntersectionRequest {
    pub scene_id: String,
    pub now_us: u64,
    pub future_us: u64,
    pub ego_data: Option<EgoData>,
    pub other_objects: Vec<OtherObject>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundIntersectionStatus {
    #[default]
    Unknown,
    SuccessfulUpdate,
    InsufficientPointsFitplane,
    HighTranslation,
    HighRotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReturnPose {
    pub pose: Pose,
    pub status: GroundIntersectionStatus,
}

/// Ground-constrained poses; `other_poses` follows request order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicsGroundIntersectionReturn {
    pub ego_pose: Option<ReturnPose>,
    pub other_poses: Vec<ReturnPose>,
}
