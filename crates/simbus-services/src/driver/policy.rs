// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driving policies and the batch executor that runs them.

use super::session::{DriveCommand, Frame};
use crate::types::{Pose, PoseAtTime, Trajectory};
use simbus::{BatchExecutor, BoxError};
use std::collections::BTreeMap;

/// Everything a policy sees for one drive request.
#[derive(Debug, Clone)]
pub struct PolicyInput {
    pub session_id: String,
    pub command: DriveCommand,
    /// Planar speed (m/s).
    pub speed: f64,
    /// Longitudinal acceleration (m/s^2).
    pub acceleration: f64,
    pub camera_frames: BTreeMap<String, Vec<Frame>>,
    /// Local-frame ego history, oldest first.
    pub pose_history: Vec<PoseAtTime>,
}

/// Policy output in the rig frame at prediction time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    /// Future positions, one per output period.
    pub trajectory_xy: Vec<(f64, f64)>,
    /// Heading of each position relative to the current heading.
    pub headings: Vec<f64>,
    pub reasoning_text: Option<String>,
}

/// A driving policy evaluated in batches on the driver's worker thread.
pub trait DrivingPolicy: Send + 'static {
    fn name(&self) -> &str;

    /// Rate of the predicted positions.
    fn output_frequency_hz(&self) -> f64;

    /// One prediction per input, in input order.
    fn predict_batch(&mut self, inputs: &[PolicyInput]) -> Result<Vec<Prediction>, BoxError>;
}

/// Reference policy: hold speed, turn at a fixed yaw rate on turn commands.
#[derive(Debug, Clone)]
pub struct ConstantVelocityPolicy {
    output_frequency_hz: f64,
    horizon_steps: usize,
    turn_rate: f64,
}

impl ConstantVelocityPolicy {
    /// Yaw rate (rad/s) applied on `Left`/`Right`.
    pub const DEFAULT_TURN_RATE: f64 = 0.2;

    pub fn new(output_frequency_hz: f64, horizon_steps: usize) -> Self {
        Self {
            output_frequency_hz,
            horizon_steps,
            turn_rate: Self::DEFAULT_TURN_RATE,
        }
    }

    pub fn with_turn_rate(mut self, turn_rate: f64) -> Self {
        self.turn_rate = turn_rate;
        self
    }

    fn predict(&self, input: &PolicyInput) -> Prediction {
        let dt = 1.0 / self.output_frequency_hz;
        let yaw_rate = match input.command {
            DriveCommand::Left => self.turn_rate,
            DriveCommand::Straight => 0.0,
            DriveCommand::Right => -self.turn_rate,
        };

        let (mut x, mut y, mut heading) = (0.0_f64, 0.0_f64, 0.0_f64);
        let mut prediction = Prediction::default();
        for _ in 0..self.horizon_steps {
            heading += yaw_rate * dt;
            x += input.speed * heading.cos() * dt;
            y += input.speed * heading.sin() * dt;
            prediction.trajectory_xy.push((x, y));
            prediction.headings.push(heading);
        }
        prediction
    }
}

impl DrivingPolicy for ConstantVelocityPolicy {
    fn name(&self) -> &str {
        "constant-velocity"
    }

    fn output_frequency_hz(&self) -> f64 {
        self.output_frequency_hz
    }

    fn predict_batch(&mut self, inputs: &[PolicyInput]) -> Result<Vec<Prediction>, BoxError> {
        Ok(inputs.iter().map(|input| self.predict(input)).collect())
    }
}

/// Runs a [`DrivingPolicy`] as the driver's batch executor.
pub struct PolicyExecutor {
    policy: Box<dyn DrivingPolicy>,
}

impl PolicyExecutor {
    pub fn new(policy: Box<dyn DrivingPolicy>) -> Self {
        Self { policy }
    }
}

impl BatchExecutor for PolicyExecutor {
    type Job = PolicyInput;
    type Output = Prediction;

    fn execute(&mut self, jobs: &[PolicyInput]) -> Result<Vec<Prediction>, BoxError> {
        tracing::debug!("Running {} on a batch of {}", self.policy.name(), jobs.len());
        self.policy.predict_batch(jobs)
    }
}

/// Convert a rig-frame prediction into a local-frame trajectory anchored at
/// `current`, starting with `current` itself. Point `k` is stamped
/// `time_now_us + k / output_frequency_hz`.
pub fn prediction_to_trajectory(
    prediction: &Prediction,
    current: &PoseAtTime,
    time_now_us: u64,
    output_frequency_hz: f64,
) -> Trajectory {
    let mut poses = Vec::with_capacity(prediction.trajectory_xy.len() + 1);
    poses.push(*current);

    let step_us = (1_000_000.0 / output_frequency_hz) as u64;
    let z = current.pose.vec.z;
    for (k, (&(x, y), &heading)) in prediction
        .trajectory_xy
        .iter()
        .zip(&prediction.headings)
        .enumerate()
    {
        let in_rig = Pose::planar(x, y, 0.0, heading);
        let mut local = in_rig.compose(&current.pose);
        local.vec.z = z;
        poses.push(PoseAtTime::new(local, time_now_us + (k as u64 + 1) * step_us));
    }
    Trajectory::new(poses)
}
