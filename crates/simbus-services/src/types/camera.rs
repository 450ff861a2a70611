// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Camera definitions carried by driver session-start requests.

use super::common::Pose;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutterType {
    #[default]
    Unknown,
    RollingTopToBottom,
    RollingLeftToRight,
    RollingBottomToTop,
    RollingRightToLeft,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FthetaPolynomialType {
    #[default]
    Unknown,
    PixeldistToAngle,
    AngleToPixeldist,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LinearCde {
    pub linear_c: f64,
    pub linear_d: f64,
    pub linear_e: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FthetaParams {
    pub principal_point_x: f64,
    pub principal_point_y: f64,
    pub reference_poly: FthetaPolynomialType,
    pub pixeldist_to_angle_poly: Vec<f64>,
    pub angle_to_pixeldist_poly: Vec<f64>,
    pub max_angle: f64,
    pub linear_cde: LinearCde,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PinholeParams {
    pub principal_point_x: f64,
    pub principal_point_y: f64,
    pub focal_length_x: f64,
    pub focal_length_y: f64,
    pub radial_coeffs: Vec<f64>,
    pub tangential_coeffs: Vec<f64>,
    pub thin_prism_coeffs: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FisheyeParams {
    pub principal_point_x: f64,
    pub principal_point_y: f64,
    pub focal_length_x: f64,
    pub focal_length_y: f64,
    pub radial_coeffs: Vec<f64>,
    pub max_angle: f64,
}

/// Projection model of a camera. Exactly one model per camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CameraModel {
    Ftheta(FthetaParams),
    OpencvPinhole(PinholeParams),
    OpencvFisheye(FisheyeParams),
}

impl Default for CameraModel {
    fn default() -> Self {
        Self::OpencvPinhole(PinholeParams::default())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraSpec {
    pub model: CameraModel,
    pub logical_id: String,
    pub resolution_h: u32,
    pub resolution_w: u32,
    pub shutter_type: ShutterType,
}

/// A camera mounted on the simulated vehicle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AvailableCamera {
    pub intrinsics: CameraSpec,
    pub rig_to_camera: Pose,
    pub logical_id: String,
}

impl AvailableCamera {
    /// Pinhole camera at the rig origin.
    pub fn pinhole(logical_id: &str, resolution_w: u32, resolution_h: u32) -> Self {
        Self {
            intrinsics: CameraSpec {
                model: CameraModel::OpencvPinhole(PinholeParams {
                    principal_point_x: f64::from(resolution_w) / 2.0,
                    principal_point_y: f64::from(resolution_h) / 2.0,
                    focal_length_x: f64::from(resolution_w),
                    focal_length_y: f64::from(resolution_w),
                    ..PinholeParams::default()
                }),
                logical_id: logical_id.to_string(),
                resolution_h,
                resolution_w,
                shutter_type: ShutterType::Global,
            },
            rig_to_camera: Pose::default(),
            logical_id: logical_id.to_string(),
        }
    }
}
