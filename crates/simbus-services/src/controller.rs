// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller and vehicle-model service.
//!
//! A session is registered by `session_start` and gets its vehicle model on
//! the first `run` request, built from that request's state and the
//! parameters carried by the start request. The control law and vehicle
//! dynamics are pluggable through [`VehicleModelFactory`];
//! [`KinematicVehicle`] is the reference model.

use crate::endpoints::{ChannelQos, ControllerServerEndpoints};
use crate::error::{Result, ServiceError};
use crate::types::{
    DynamicState, Pose, PoseAtTime, RunControllerAndVehicleModelRequest,
    RunControllerAndVehicleModelResponse, SessionRequestStatus, ShutdownRequest, StateAtTime,
    VdcSessionCloseRequest, VdcSessionRequest, Vec3, VehicleAndControllerParams,
    VersionResponse,
};
use crate::types::common::wrap_angle;
use parking_lot::Mutex;
use simbus::{BoxError, Participant, SessionRegistry, StopSignal};
use std::sync::Arc;

/// Name used in logs and version strings.
pub const SERVICE_NAME: &str = "controller";

/// Closed-loop vehicle simulation for one session.
pub trait VehicleModel: Send {
    /// Track `request.planned_trajectory_in_rig` from `request.state` up to
    /// `request.future_time_us`.
    fn step(
        &mut self,
        request: &RunControllerAndVehicleModelRequest,
    ) -> Result<RunControllerAndVehicleModelResponse>;
}

/// Builds a vehicle model for a session.
pub trait VehicleModelFactory: Send + Sync + 'static {
    fn create(
        &self,
        session_uuid: &str,
        params: &VehicleAndControllerParams,
        initial_state: &StateAtTime,
    ) -> Result<Box<dyn VehicleModel>>;
}

/// Reference vehicle that tracks its plan exactly.
///
/// The plan is read in the rig frame at the request time; the new pose is
/// the plan sampled at `future_time_us`, and the dynamic state is derived
/// from the motion over the step.
#[derive(Debug, Clone)]
pub struct KinematicVehicle {
    timestamp_us: u64,
    pose: Pose,
    state: DynamicState,
}

impl KinematicVehicle {
    pub fn new(initial_state: &StateAtTime) -> Self {
        Self {
            timestamp_us: initial_state.timestamp_us,
            pose: initial_state.pose,
            state: initial_state.state,
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }
}

impl VehicleModel for KinematicVehicle {
    fn step(
        &mut self,
        request: &RunControllerAndVehicleModelRequest,
    ) -> Result<RunControllerAndVehicleModelResponse> {
        let now_us = request.state.timestamp_us;
        if now_us != self.timestamp_us {
            return Err(ServiceError::invalid(format!(
                "Timestamp mismatch: expected {}, got {}",
                self.timestamp_us, now_us
            )));
        }
        if request.planned_trajectory_in_rig.is_empty() {
            return Err(ServiceError::invalid("Planned trajectory is empty"));
        }
        if request.future_time_us <= now_us {
            return Err(ServiceError::invalid(format!(
                "future_time_us ({}) must be greater than current timestamp ({})",
                request.future_time_us, now_us
            )));
        }

        // The caller's state is authoritative for the pose.
        self.pose = request.state.pose;
        if request.coerce_dynamic_state {
            self.state = request.state.state;
        }

        let target_in_rig = request
            .planned_trajectory_in_rig
            .interpolate(request.future_time_us)
            .ok_or_else(|| ServiceError::invalid("Planned trajectory is empty"))?;
        let mut next = target_in_rig.compose(&self.pose);
        next.vec.z = self.pose.vec.z;

        let dt = (request.future_time_us - now_us) as f64 * 1e-6;
        let motion = next.relative_to(&self.pose);
        let yaw_rate = wrap_angle(next.yaw() - self.pose.yaw()) / dt;
        let velocity = Vec3::new(motion.vec.x / dt, motion.vec.y / dt, 0.0);
        let previous = self.state;
        let state = DynamicState {
            angular_velocity: Vec3::new(0.0, 0.0, yaw_rate),
            linear_velocity: velocity,
            linear_acceleration: Vec3::new(
                (velocity.x - previous.linear_velocity.x) / dt,
                (velocity.y - previous.linear_velocity.y) / dt,
                0.0,
            ),
            angular_acceleration: Vec3::new(
                0.0,
                0.0,
                (yaw_rate - previous.angular_velocity.z) / dt,
            ),
        };

        self.pose = next;
        self.state = state;
        self.timestamp_us = request.future_time_us;

        let pose = PoseAtTime::new(next, self.timestamp_us);
        Ok(RunControllerAndVehicleModelResponse {
            pose_local_to_rig: pose,
            pose_local_to_rig_estimated: pose,
            dynamic_state: state,
            dynamic_state_estimated: state,
        })
    }
}

/// Factory for [`KinematicVehicle`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KinematicVehicleFactory;

impl VehicleModelFactory for KinematicVehicleFactory {
    fn create(
        &self,
        session_uuid: &str,
        params: &VehicleAndControllerParams,
        initial_state: &StateAtTime,
    ) -> Result<Box<dyn VehicleModel>> {
        tracing::info!(
            "Creating kinematic vehicle for session {} (rig_file='{}', {} amend files)",
            session_uuid,
            params.rig_file,
            params.amend_files.len()
        );
        Ok(Box::new(KinematicVehicle::new(initial_state)))
    }
}

type SessionModel = Mutex<Box<dyn VehicleModel>>;

/// Controller service: session lifecycle plus the `run` channel.
pub struct ControllerService {
    endpoints: ControllerServerEndpoints,
    sessions: SessionRegistry<SessionModel, VehicleAndControllerParams>,
    factory: Arc<dyn VehicleModelFactory>,
    stop: StopSignal,
}

impl ControllerService {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        factory: Arc<dyn VehicleModelFactory>,
    ) -> Result<Self> {
        Ok(Self {
            endpoints: ControllerServerEndpoints::new(participant, qos)?,
            sessions: SessionRegistry::new(SERVICE_NAME),
            factory,
            stop: StopSignal::new(),
        })
    }

    pub fn start_session(&self, request: &VdcSessionRequest) -> Result<SessionRequestStatus> {
        tracing::info!("Registering session: {}", request.session_uuid);
        self.sessions.start_with(
            &request.session_uuid,
            request.vehicle_and_controller_params.clone(),
        )?;
        Ok(SessionRequestStatus::default())
    }

    pub fn close_session(&self, request: &VdcSessionCloseRequest) -> Result<()> {
        tracing::info!("Closing session: {}", request.session_uuid);
        self.sessions.close(&request.session_uuid)?;
        Ok(())
    }

    pub async fn run_controller_and_vehicle_model(
        &self,
        request: &RunControllerAndVehicleModelRequest,
    ) -> Result<RunControllerAndVehicleModelResponse> {
        tracing::debug!(
            "run_controller_and_vehicle_model: {}: {} -> {}",
            request.session_uuid,
            request.state.timestamp_us,
            request.future_time_us
        );
        let factory = &self.factory;
        let model = self
            .sessions
            .get_or_create(&request.session_uuid, |params| async move {
                factory
                    .create(&request.session_uuid, &params, &request.state)
                    .map(Mutex::new)
            })
            .await?;
        let response = model.lock().step(request);
        response
    }

    pub fn version(&self) -> VersionResponse {
        VersionResponse::for_service(SERVICE_NAME)
    }

    pub fn sessions(&self) -> &SessionRegistry<SessionModel, VehicleAndControllerParams> {
        &self.sessions
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    fn shut_down(&self, request: &ShutdownRequest) {
        tracing::info!("shut_down requested (t={}us)", request.timestamp_us);
        self.stop.stop();
    }

    /// Serve every channel until a shutdown message arrives or the stop
    /// signal is set.
    pub async fn run(&self) {
        tracing::info!("{} service running", SERVICE_NAME);
        let ep = &self.endpoints;
        let stop = &self.stop;
        tokio::join!(
            ep.session_start.serve(
                |req| async move { self.start_session(&req).map_err(BoxError::from) },
                stop,
            ),
            ep.session_close.serve(
                |req| async move { self.close_session(&req).map_err(BoxError::from) },
                stop,
            ),
            ep.run.serve(
                |req| async move {
                    self.run_controller_and_vehicle_model(&req)
                        .await
                        .map_err(BoxError::from)
                },
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
        tracing::info!(
            "{} service stopped ({} sessions open)",
            SERVICE_NAME,
            self.sessions.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Trajectory;
    use simbus::transport::LocalDomain;

    fn initial_state() -> StateAtTime {
        StateAtTime {
            timestamp_us: 1_000_000,
            pose: Pose::planar(0.0, 0.0, 0.5, 0.0),
            state: DynamicState {
                linear_velocity: Vec3::new(10.0, 0.0, 0.0),
                ..DynamicState::default()
            },
        }
    }

    fn straight_plan(now_us: u64) -> Trajectory {
        Trajectory::new(
            (0..=10u32)
                .map(|i| {
                    PoseAtTime::new(
                        Pose::planar(f64::from(i), 0.0, 0.0, 0.0),
                        now_us + u64::from(i) * 100_000,
                    )
                })
                .collect(),
        )
    }

    fn request(state: StateAtTime, future_time_us: u64) -> RunControllerAndVehicleModelRequest {
        RunControllerAndVehicleModelRequest {
            session_uuid: "s1".into(),
            state,
            planned_trajectory_in_rig: straight_plan(state.timestamp_us),
            future_time_us,
            coerce_dynamic_state: false,
        }
    }

    #[test]
    fn test_kinematic_step_follows_plan() {
        let state = initial_state();
        let mut vehicle = KinematicVehicle::new(&state);

        let response = vehicle.step(&request(state, 1_200_000)).unwrap();
        let pose = response.pose_local_to_rig;
        assert_eq!(pose.timestamp_us, 1_200_000);
        assert!((pose.pose.vec.x - 2.0).abs() < 1e-9);
        assert!((pose.pose.vec.z - 0.5).abs() < 1e-9);
        // 2 m in 0.2 s
        assert!((response.dynamic_state.linear_velocity.x - 10.0).abs() < 1e-9);
        assert_eq!(vehicle.timestamp_us(), 1_200_000);
    }

    #[test]
    fn test_step_validation() {
        let state = initial_state();
        let mut vehicle = KinematicVehicle::new(&state);

        let mut stale = state;
        stale.timestamp_us = 999;
        assert!(matches!(
            vehicle.step(&request(stale, 2_000_000)),
            Err(ServiceError::InvalidRequest(msg)) if msg.contains("Timestamp mismatch")
        ));

        let mut empty = request(state, 1_100_000);
        empty.planned_trajectory_in_rig = Trajectory::default();
        assert!(vehicle.step(&empty).is_err());

        assert!(vehicle.step(&request(state, state.timestamp_us)).is_err());
        // Rejected requests leave the model untouched.
        assert_eq!(vehicle.timestamp_us(), state.timestamp_us);
    }

    #[tokio::test]
    async fn test_model_built_once_per_session() {
        let participant =
            Participant::with_transport("ctrl", Arc::new(LocalDomain::new(0))).unwrap();
        let service = ControllerService::new(
            &participant,
            &ChannelQos::default(),
            Arc::new(KinematicVehicleFactory),
        )
        .unwrap();

        let state = initial_state();
        let run = request(state, 1_100_000);
        assert!(matches!(
            service.run_controller_and_vehicle_model(&run).await,
            Err(ServiceError::Bus(simbus::Error::UnknownSession(_)))
        ));

        service
            .start_session(&VdcSessionRequest {
                session_uuid: "s1".into(),
                ..VdcSessionRequest::default()
            })
            .unwrap();
        let first = service.run_controller_and_vehicle_model(&run).await.unwrap();

        // Second step continues from the first: the model was reused.
        let next_state = StateAtTime {
            timestamp_us: first.pose_local_to_rig.timestamp_us,
            pose: first.pose_local_to_rig.pose,
            state: first.dynamic_state,
        };
        service
            .run_controller_and_vehicle_model(&request(next_state, 1_200_000))
            .await
            .unwrap();

        service
            .close_session(&VdcSessionCloseRequest {
                session_uuid: "s1".into(),
            })
            .unwrap();
        assert!(service.sessions().is_empty());
    }
}
