// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driving-policy service.
//!
//! Observations (camera frames, ego poses, routes) arrive on oneway
//! channels and accumulate in the session's history. A `drive` request
//! snapshots that history into a [`PolicyInput`] and submits it to a
//! [`WorkerBridge`], whose worker thread evaluates the policy on batches
//! gathered from every session. The drive channel runs up to
//! `max_batch_size` requests at once so concurrent sessions can share a
//! batch.

mod policy;
mod session;

pub use policy::{
    prediction_to_trajectory, ConstantVelocityPolicy, DrivingPolicy, PolicyExecutor, PolicyInput,
    Prediction,
};
pub use session::{command_from_route, DriveCommand, DriverSession, Frame, FrameCache};

use crate::config::DriverConfig;
use crate::endpoints::{ChannelQos, DriverServerEndpoints};
use crate::error::{Result, ServiceError};
use crate::types::{
    DriveRequest, DriveResponse, DriveResponseDebugInfo, DriveSessionCloseRequest,
    DriveSessionRequest, GroundTruthRequest, RolloutCameraImage, RolloutEgoTrajectory,
    RouteRequest, SessionRequestStatus, ShutdownRequest, VersionResponse,
};
use parking_lot::Mutex;
use serde::Serialize;
use simbus::{
    BoxError, BridgeConfig, BridgeStatsSnapshot, Participant, ServeOptions, SessionRegistry,
    StopSignal, WorkerBridge,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "driver";

/// Diagnostics attached to every non-empty drive response.
#[derive(Debug, Serialize)]
struct DriveDebug<'a> {
    policy: &'a str,
    command: DriveCommand,
    num_frames: BTreeMap<String, usize>,
    num_poses: usize,
    trajectory_points: usize,
    reasoning_text: Option<String>,
}

/// Driver service.
pub struct DriverService {
    endpoints: DriverServerEndpoints,
    config: DriverConfig,
    sessions: SessionRegistry<Mutex<DriverSession>>,
    bridge: WorkerBridge<PolicyInput, Prediction>,
    policy_name: String,
    output_frequency_hz: f64,
    stop: StopSignal,
}

impl DriverService {
    /// Create the service and start its policy worker.
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        config: DriverConfig,
        policy: Box<dyn DrivingPolicy>,
    ) -> Result<Self> {
        let mut endpoints = DriverServerEndpoints::new(participant, qos)?;
        endpoints.drive = endpoints
            .drive
            .with_options(ServeOptions::default().max_in_flight(config.max_batch_size));

        let policy_name = policy.name().to_string();
        let output_frequency_hz = policy.output_frequency_hz();
        let bridge = WorkerBridge::start(
            BridgeConfig::new("driver-policy", config.max_batch_size),
            PolicyExecutor::new(policy),
        )?;

        tracing::info!(
            "Initialized {} policy with {} cameras, context_length={}",
            policy_name,
            config.use_cameras.len(),
            config.context_length
        );

        Ok(Self {
            endpoints,
            config,
            sessions: SessionRegistry::new(SERVICE_NAME),
            bridge,
            policy_name,
            output_frequency_hz,
            stop: StopSignal::new(),
        })
    }

    fn session(&self, session_id: &str) -> Result<Arc<Mutex<DriverSession>>> {
        self.sessions.get(session_id)?.ok_or_else(|| {
            ServiceError::invalid(format!("Session {} is still being set up", session_id))
        })
    }

    pub async fn start_session(
        &self,
        request: &DriveSessionRequest,
    ) -> Result<SessionRequestStatus> {
        tracing::info!(
            "Starting {} session {}",
            self.policy_name,
            request.session_uuid
        );
        let session = DriverSession::create(request, &self.config)?;
        self.sessions.start(&request.session_uuid)?;
        self.sessions
            .get_or_create(&request.session_uuid, |()| async move {
                Ok::<_, ServiceError>(Mutex::new(session))
            })
            .await?;
        Ok(SessionRequestStatus::default())
    }

    pub fn close_session(&self, request: &DriveSessionCloseRequest) -> Result<()> {
        tracing::info!("Closing session {}", request.session_uuid);
        self.sessions.close(&request.session_uuid)?;
        Ok(())
    }

    pub fn submit_image_observation(&self, request: &RolloutCameraImage) -> Result<()> {
        let image = &request.camera_image;
        tracing::debug!(
            "submit_image_observation: session={}, logical_id={}",
            request.session_uuid,
            image.logical_id
        );
        let session = self.session(&request.session_uuid)?;
        let mut session = session.lock();
        session.add_image(
            &image.logical_id,
            image.frame_end_us,
            Arc::from(image.image_bytes.as_slice()),
        )
    }

    pub fn submit_egomotion_observation(&self, request: &RolloutEgoTrajectory) -> Result<()> {
        tracing::debug!("submit_egomotion_observation: session={}", request.session_uuid);
        let poses = &request.trajectory.poses;
        if poses.len() != 1 {
            return Err(ServiceError::invalid(format!(
                "Expected exactly 1 pose in egomotion trajectory, got {}",
                poses.len()
            )));
        }

        let session = self.session(&request.session_uuid)?;
        let mut session = session.lock();
        session.add_egoposes(&request.trajectory);
        if let Some(state) = request.dynamic_state {
            session.add_dynamic_state(poses[0].timestamp_us, Some(state))?;
        }
        Ok(())
    }

    pub fn submit_route(&self, request: &RouteRequest) -> Result<()> {
        tracing::debug!(
            "submit_route: session={}, waypoint_count={}",
            request.session_uuid,
            request.route.waypoints.len()
        );
        let session = self.session(&request.session_uuid)?;
        session
            .lock()
            .update_command_from_route(&request.route, &self.config);
        Ok(())
    }

    pub fn submit_recording_ground_truth(&self, request: &GroundTruthRequest) {
        tracing::debug!(
            "Ground truth for session {} received but not used by driver",
            request.session_uuid
        );
    }

    /// Plan from the session's history.
    ///
    /// Returns an empty trajectory until every camera has a full context,
    /// an ego pose and a dynamic state have been observed.
    pub async fn drive(&self, request: &DriveRequest) -> Result<DriveResponse> {
        tracing::debug!(
            "drive: session={}, time_now_us={}",
            request.session_uuid,
            request.time_now_us
        );
        let session = self.session(&request.session_uuid)?;

        let (input, current) = {
            let session = session.lock();
            if !session.all_cameras_ready() {
                tracing::debug!(
                    "Insufficient frames for {}: got {}, need {}. Returning empty trajectory",
                    request.session_uuid,
                    session.min_frame_count(),
                    session.min_frames_required()
                );
                return Ok(DriveResponse::empty());
            }
            let (Some(current), Some(state)) =
                (session.latest_pose(), session.latest_dynamic_state())
            else {
                tracing::debug!(
                    "No ego pose or dynamic state for {} yet. Returning empty trajectory",
                    request.session_uuid
                );
                return Ok(DriveResponse::empty());
            };

            let input = PolicyInput {
                session_id: request.session_uuid.clone(),
                command: session.current_command(),
                speed: state.speed(),
                acceleration: state.linear_acceleration.x,
                camera_frames: session.camera_context(),
                pose_history: session.poses().to_vec(),
            };
            (input, current)
        };

        let command = input.command;
        let num_poses = input.pose_history.len();
        let num_frames = input
            .camera_frames
            .iter()
            .map(|(id, frames)| (id.clone(), frames.len()))
            .collect();

        let prediction = self.bridge.submit(input).await?;
        let trajectory = prediction_to_trajectory(
            &prediction,
            &current,
            request.time_now_us,
            self.output_frequency_hz,
        );

        let debug = DriveDebug {
            policy: &self.policy_name,
            command,
            num_frames,
            num_poses,
            trajectory_points: trajectory.len(),
            reasoning_text: prediction.reasoning_text,
        };
        tracing::debug!(
            "drive returning: session={}, trajectory_points={}",
            request.session_uuid,
            trajectory.len()
        );
        Ok(DriveResponse {
            trajectory,
            debug_info: DriveResponseDebugInfo {
                unstructured_debug_info: serde_json::to_vec(&debug).unwrap_or_default(),
                sampled_trajectories: Vec::new(),
            },
        })
    }

    pub fn version(&self) -> VersionResponse {
        let mut version = VersionResponse::for_service(SERVICE_NAME);
        version.version_id = format!("{}-{}", self.policy_name, version.version_id);
        version
    }

    pub fn sessions(&self) -> &SessionRegistry<Mutex<DriverSession>> {
        &self.sessions
    }

    pub fn worker_stats(&self) -> BridgeStatsSnapshot {
        self.bridge.stats()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    fn shut_down(&self, request: &ShutdownRequest) {
        tracing::info!("shut_down requested (t={}us)", request.timestamp_us);
        self.stop.stop();
    }

    /// Stop the policy worker; queued drives resolve as cancelled.
    pub async fn stop_worker(&self) {
        self.bridge.stop().await;
    }

    /// Serve every channel until a shutdown message arrives or the stop
    /// signal is set, then stop the policy worker.
    pub async fn run(&self) {
        tracing::info!("{} service running", SERVICE_NAME);
        let ep = &self.endpoints;
        let stop = &self.stop;
        tokio::join!(
            ep.session_start.serve(
                |req| async move { self.start_session(&req).await.map_err(BoxError::from) },
                stop,
            ),
            ep.session_close.serve(
                |req| async move { self.close_session(&req).map_err(BoxError::from) },
                stop,
            ),
            ep.image.serve(
                |req| async move { self.submit_image_observation(&req).map_err(BoxError::from) },
                stop,
            ),
            ep.egomotion.serve(
                |req| async move {
                    self.submit_egomotion_observation(&req)
                        .map_err(BoxError::from)
                },
                stop,
            ),
            ep.route.serve(
                |req| async move { self.submit_route(&req).map_err(BoxError::from) },
                stop,
            ),
            ep.ground_truth.serve(
                |req| async move {
                    self.submit_recording_ground_truth(&req);
                    Ok::<_, BoxError>(())
                },
                stop,
            ),
            ep.drive.serve(
                |req| async move { self.drive(&req).await.map_err(BoxError::from) },
                stop,
            ),
            ep.version.serve(
                |_req| async move { Ok::<_, BoxError>(self.version()) },
                stop,
            ),
            ep.shutdown.serve(
                |req| async move {
                    self.shut_down(&req);
                    Ok::<_, BoxError>(())
                },
                stop,
            ),
        );

        self.stop_worker().await;
        let stats = self.worker_stats();
        tracing::info!(
            "{} service stopped: {} batches, {} items, avg size {:.1}",
            SERVICE_NAME,
            stats.batches,
            stats.items,
            stats.average_batch_size()
        );
    }
}
