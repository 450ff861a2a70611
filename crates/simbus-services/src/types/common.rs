// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Geometry and service-wide records.

use serde::{Deserialize, Serialize};

/// Unit quaternion, scalar first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Rotation about +Z only.
    pub fn from_yaw(yaw: f64) -> Self {
        let half = 0.5 * yaw;
        Self {
            w: half.cos(),
            x: 0.0,
            y: 0.0,
            z: half.sin(),
        }
    }

    /// Yaw component (rotation about +Z).
    pub fn yaw(&self) -> f64 {
        f64::atan2(
            2.0 * (self.w * self.z + self.x * self.y),
            1.0 - 2.0 * (self.y * self.y + self.z * self.z),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Length of the XY projection.
    pub fn planar_norm(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub vec: Vec3,
    pub quat: Quat,
}

impl Pose {
    pub fn new(vec: Vec3, quat: Quat) -> Self {
        Self { vec, quat }
    }

    /// Planar pose at `(x, y, z)` facing `yaw`.
    pub fn planar(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Self::new(Vec3::new(x, y, z), Quat::from_yaw(yaw))
    }

    pub fn yaw(&self) -> f64 {
        self.quat.yaw()
    }

    /// This pose expressed in the frame of `origin` (planar: yaw only).
    pub fn relative_to(&self, origin: &Pose) -> Pose {
        let yaw0 = origin.yaw();
        let (sin, cos) = yaw0.sin_cos();
        let dx = self.vec.x - origin.vec.x;
        let dy = self.vec.y - origin.vec.y;
        Pose::planar(
            cos * dx + sin * dy,
            -sin * dx + cos * dy,
            self.vec.z - origin.vec.z,
            wrap_angle(self.yaw() - yaw0),
        )
    }

    /// Inverse of [`relative_to`](Self::relative_to): a pose given in the
    /// frame of `origin`, expressed in the frame `origin` lives in.
    pub fn compose(&self, origin: &Pose) -> Pose {
        let yaw0 = origin.yaw();
        let (sin, cos) = yaw0.sin_cos();
        Pose::planar(
            origin.vec.x + cos * self.vec.x - sin * self.vec.y,
            origin.vec.y + sin * self.vec.x + cos * self.vec.y,
            origin.vec.z + self.vec.z,
            wrap_angle(yaw0 + self.yaw()),
        )
    }
}

/// Rig-frame velocities and accelerations.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DynamicState {
    pub angular_velocity: Vec3,
    pub linear_velocity: Vec3,
    pub linear_acceleration: Vec3,
    pub angular_acceleration: Vec3,
}

impl DynamicState {
    /// Planar speed.
    pub fn speed(&self) -> f64 {
        self.linear_velocity.planar_norm()
    }
}

/// Axis-aligned bounding box extents.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aabb {
    pub size_x: f64,
    pub size_y: f64,
    pub size_z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseAtTime {
    pub pose: Pose,
    pub timestamp_us: u64,
}

impl PoseAtTime {
    pub fn new(pose: Pose, timestamp_us: u64) -> Self {
        Self { pose, timestamp_us }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StateAtTime {
    pub timestamp_us: u64,
    pub pose: Pose,
    pub state: DynamicState,
}

/// Time-ordered poses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub poses: Vec<PoseAtTime>,
}

impl Trajectory {
    pub fn new(poses: Vec<PoseAtTime>) -> Self {
        Self { poses }
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn last(&self) -> Option<&PoseAtTime> {
        self.poses.last()
    }

    /// Pose at `timestamp_us`, linearly interpolated between neighbors and
    /// clamped to the first/last pose outside the covered range.
    pub fn interpolate(&self, timestamp_us: u64) -> Option<Pose> {
        let first = self.poses.first()?;
        if timestamp_us <= first.timestamp_us {
            return Some(first.pose);
        }
        let next = self
            .poses
            .iter()
            .position(|p| p.timestamp_us >= timestamp_us);
        let Some(next) = next else {
            return self.poses.last().map(|p| p.pose);
        };
        let (a, b) = (&self.poses[next - 1], &self.poses[next]);
        let span = (b.timestamp_us - a.timestamp_us) as f64;
        if span <= 0.0 {
            return Some(b.pose);
        }
        let t = (timestamp_us - a.timestamp_us) as f64 / span;
        let lerp = |from: f64, to: f64| from + (to - from) * t;
        let yaw = a.pose.yaw() + wrap_angle(b.pose.yaw() - a.pose.yaw()) * t;
        Some(Pose::planar(
            lerp(a.pose.vec.x, b.pose.vec.x),
            lerp(a.pose.vec.y, b.pose.vec.y),
            lerp(a.pose.vec.z, b.pose.vec.z),
            yaw,
        ))
    }
}

/// Wrap an angle into `(-pi, pi]`.
pub fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// API version spoken by every service in this crate.
pub const API_VERSION: ApiVersion = ApiVersion {
    major: 0,
    minor: 1,
    patch: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version_id: String,
    pub git_hash: String,
    pub api_version: ApiVersion,
}

impl VersionResponse {
    /// Version of the named service built from this crate.
    pub fn for_service(service: &str) -> Self {
        Self {
            version_id: format!("{}-{}", service, env!("CARGO_PKG_VERSION")),
            git_hash: option_env!("SIMBUS_GIT_HASH")
                .unwrap_or("unknown")
                .to_string(),
            api_version: API_VERSION,
        }
    }
}

/// Acknowledgment of a session-start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionRequestStatus {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailableScenesRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailableScenesResponse {
    pub scene_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShutdownRequest {
    pub timestamp_us: u64,
}
