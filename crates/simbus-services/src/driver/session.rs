// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-session observation history of the driver.

use crate::config::DriverConfig;
use crate::error::{Result, ServiceError};
use crate::types::{
    AvailableCamera, DriveSessionRequest, DynamicState, PoseAtTime, Route, Trajectory,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// High-level maneuver requested from the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveCommand {
    Left,
    #[default]
    Straight,
    Right,
}

/// Command implied by the route: the first waypoint at least
/// `min_lookahead_distance` ahead (or the last one) decides; a lateral offset
/// beyond `command_distance_threshold` is a turn. Waypoints are in the rig
/// frame, +y to the left.
pub fn command_from_route(
    route: &Route,
    command_distance_threshold: f64,
    min_lookahead_distance: f64,
) -> DriveCommand {
    let target = route
        .waypoints
        .iter()
        .find(|w| w.planar_norm() >= min_lookahead_distance)
        .or_else(|| route.waypoints.last());
    match target {
        Some(w) if w.y > command_distance_threshold => DriveCommand::Left,
        Some(w) if w.y < -command_distance_threshold => DriveCommand::Right,
        _ => DriveCommand::Straight,
    }
}

/// One camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub timestamp_us: u64,
    pub image: Arc<[u8]>,
}

/// Recent frames of one camera, enough to feed `context_length` frames
/// spaced `subsample_factor` apart.
#[derive(Debug, Clone)]
pub struct FrameCache {
    camera_id: String,
    context_length: usize,
    subsample_factor: usize,
    frames: VecDeque<Frame>,
}

impl FrameCache {
    pub fn new(camera_id: &str, context_length: usize, subsample_factor: usize) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            context_length: context_length.max(1),
            subsample_factor: subsample_factor.max(1),
            frames: VecDeque::new(),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Frames that must be buffered before the context is complete.
    pub fn min_frames_required(&self) -> usize {
        (self.context_length - 1) * self.subsample_factor + 1
    }

    /// Insert a frame in timestamp order, dropping the oldest beyond capacity.
    pub fn add_image(&mut self, timestamp_us: u64, image: Arc<[u8]>) {
        let at = self
            .frames
            .iter()
            .rposition(|f| f.timestamp_us <= timestamp_us)
            .map_or(0, |i| i + 1);
        self.frames.insert(at, Frame { timestamp_us, image });
        while self.frames.len() > self.min_frames_required() {
            self.frames.pop_front();
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn has_enough_frames(&self) -> bool {
        self.frames.len() >= self.min_frames_required()
    }

    /// The context frames, oldest first: the newest frame and every
    /// `subsample_factor`-th one before it.
    pub fn context(&self) -> Vec<Frame> {
        let mut picked: Vec<Frame> = self
            .frames
            .iter()
            .rev()
            .step_by(self.subsample_factor)
            .take(self.context_length)
            .cloned()
            .collect();
        picked.reverse();
        picked
    }
}

/// Observation history of one driver session.
#[derive(Debug)]
pub struct DriverSession {
    uuid: String,
    seed: u64,
    debug_scene_id: String,
    frame_caches: BTreeMap<String, FrameCache>,
    available_cameras: BTreeMap<String, AvailableCamera>,
    poses: Vec<PoseAtTime>,
    dynamic_states: Vec<(u64, DynamicState)>,
    current_command: DriveCommand,
}

impl DriverSession {
    /// Validate a session-start request against the policy's camera needs.
    pub fn create(request: &DriveSessionRequest, config: &DriverConfig) -> Result<Self> {
        let vehicle = request.rollout_spec.vehicle.as_ref().ok_or_else(|| {
            ServiceError::invalid("Vehicle definition is required in DriveSessionRequest")
        })?;

        let mut available_cameras = BTreeMap::new();
        for camera in &vehicle.available_cameras {
            if camera.logical_id.is_empty() {
                return Err(ServiceError::invalid(
                    "Logical ID is required for each camera in VehicleDefinition",
                ));
            }
            tracing::debug!(
                "Available camera: {}, resolution: ({}, {})",
                camera.logical_id,
                camera.intrinsics.resolution_h,
                camera.intrinsics.resolution_w
            );
            available_cameras.insert(camera.logical_id.clone(), camera.clone());
        }

        let desired: BTreeSet<&String> = config.use_cameras.iter().collect();
        if desired.is_empty() {
            return Err(ServiceError::invalid(
                "No cameras specified in inference configuration",
            ));
        }
        let missing: Vec<&str> = desired
            .iter()
            .filter(|id| !available_cameras.contains_key(id.as_str()))
            .map(|id| id.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::invalid(format!(
                "Requested cameras {:?} are missing from the rollout spec",
                missing
            )));
        }

        let frame_caches = desired
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    FrameCache::new(id, config.context_length, config.subsample_factor),
                )
            })
            .collect();

        let debug_scene_id = request
            .debug_info
            .as_ref()
            .map(|d| d.scene_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| request.session_uuid.clone());

        Ok(Self {
            uuid: request.session_uuid.clone(),
            seed: request.random_seed,
            debug_scene_id,
            frame_caches,
            available_cameras,
            poses: Vec::new(),
            dynamic_states: Vec::new(),
            current_command: DriveCommand::default(),
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn debug_scene_id(&self) -> &str {
        &self.debug_scene_id
    }

    pub fn camera(&self, logical_id: &str) -> Option<&AvailableCamera> {
        self.available_cameras.get(logical_id)
    }

    pub fn add_image(
        &mut self,
        logical_id: &str,
        timestamp_us: u64,
        image: Arc<[u8]>,
    ) -> Result<()> {
        if let Some(cache) = self.frame_caches.get_mut(logical_id) {
            cache.add_image(timestamp_us, image);
            return Ok(());
        }
        Err(ServiceError::invalid(format!(
            "Camera {} not in desired cameras: {:?}",
            logical_id,
            self.frame_caches.keys().collect::<Vec<_>>()
        )))
    }

    pub fn all_cameras_ready(&self) -> bool {
        self.frame_caches.values().all(FrameCache::has_enough_frames)
    }

    pub fn min_frame_count(&self) -> usize {
        self.frame_caches
            .values()
            .map(FrameCache::frame_count)
            .min()
            .unwrap_or(0)
    }

    pub fn min_frames_required(&self) -> usize {
        self.frame_caches
            .values()
            .map(FrameCache::min_frames_required)
            .max()
            .unwrap_or(0)
    }

    pub fn frame_counts(&self) -> BTreeMap<String, usize> {
        self.frame_caches
            .iter()
            .map(|(id, cache)| (id.clone(), cache.frame_count()))
            .collect()
    }

    /// Context frames of every camera.
    pub fn camera_context(&self) -> BTreeMap<String, Vec<Frame>> {
        self.frame_caches
            .iter()
            .map(|(id, cache)| (id.clone(), cache.context()))
            .collect()
    }

    /// Add local-frame ego poses, keeping the history sorted by time.
    pub fn add_egoposes(&mut self, trajectory: &Trajectory) {
        self.poses.extend_from_slice(&trajectory.poses);
        self.poses.sort_by_key(|p| p.timestamp_us);
    }

    pub fn add_dynamic_state(
        &mut self,
        timestamp_us: u64,
        dynamic_state: Option<DynamicState>,
    ) -> Result<()> {
        let state =
            dynamic_state.ok_or_else(|| ServiceError::invalid("Dynamic state is required"))?;
        self.dynamic_states.push((timestamp_us, state));
        self.dynamic_states.sort_by_key(|(t, _)| *t);
        tracing::trace!(
            "dynamic_state at {}: lin_vel=({:.2}, {:.2}, {:.2})",
            timestamp_us,
            state.linear_velocity.x,
            state.linear_velocity.y,
            state.linear_velocity.z
        );
        Ok(())
    }

    pub fn poses(&self) -> &[PoseAtTime] {
        &self.poses
    }

    pub fn latest_pose(&self) -> Option<PoseAtTime> {
        self.poses.last().copied()
    }

    pub fn latest_dynamic_state(&self) -> Option<DynamicState> {
        self.dynamic_states.last().map(|(_, s)| *s)
    }

    pub fn current_command(&self) -> DriveCommand {
        self.current_command
    }

    /// Derive the command from route geometry. Ignored before the first
    /// ego pose or for an empty route.
    pub fn update_command_from_route(&mut self, route: &Route, config: &DriverConfig) {
        if !config.use_waypoint_commands || route.waypoints.is_empty() || self.poses.is_empty() {
            return;
        }
        self.current_command = command_from_route(
            route,
            config.command_distance_threshold,
            config.min_lookahead_distance,
        );
        tracing::debug!("Command updated: {:?}", self.current_command);
    }
}
