// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel bundles for each service, client side and server side.
//!
//! | Channel                          | Mode          | QoS     |
//! |----------------------------------|---------------|---------|
//! | `<svc>/session_start`            | bidirectional | session |
//! | `<svc>/session_close`            | oneway        | data    |
//! | `controller/run`                 | bidirectional | data    |
//! | `driver/{image_observation, egomotion, route, ground_truth}` | oneway | data |
//! | `driver/drive`                   | bidirectional | data    |
//! | `physics/{ground_intersection, available_scenes}` | bidirectional | data |
//! | `<svc>/version`                  | bidirectional | data    |
//! | `<svc>/shutdown`                 | oneway        | data    |

use crate::types::{
    AvailableScenesRequest, AvailableScenesResponse, DriveRequest, DriveResponse,
    DriveSessionCloseRequest, DriveSessionRequest, GroundTruthRequest,
    PhysicsGroundIntersectionRequest, PhysicsGroundIntersectionReturn, RolloutCameraImage,
    RolloutEgoTrajectory, RouteRequest, RunControllerAndVehicleModelRequest,
    RunControllerAndVehicleModelResponse, SessionRequestStatus, ShutdownRequest,
    VdcSessionCloseRequest, VdcSessionRequest, VersionRequest, VersionResponse,
};
use simbus::qos::{reliable_qos, session_qos};
use simbus::{OnewayClient, OnewayServer, Participant, QoS, ServiceClient, ServiceServer};
use std::sync::Arc;
use std::time::Duration;

/// QoS profiles applied to a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelQos {
    /// Session-start channels.
    pub session: QoS,
    /// Every other channel.
    pub data: QoS,
}

impl Default for ChannelQos {
    fn default() -> Self {
        Self {
            session: session_qos(),
            data: reliable_qos(),
        }
    }
}

fn client<Req, Resp>(
    participant: &Arc<Participant>,
    name: &str,
    qos: &QoS,
    timeout: Option<Duration>,
) -> simbus::Result<ServiceClient<Req, Resp>>
where
    Req: serde::Serialize,
    Resp: serde::de::DeserializeOwned + Send + 'static,
{
    Ok(ServiceClient::new(participant, name, qos.clone())?.with_default_timeout(timeout))
}

fn oneway_client<Req: serde::Serialize>(
    participant: &Arc<Participant>,
    name: &str,
    qos: &QoS,
) -> simbus::Result<OnewayClient<Req>> {
    OnewayClient::new(participant, name, qos.clone())
}

fn server<Req, Resp>(
    participant: &Arc<Participant>,
    name: &str,
    qos: &QoS,
) -> simbus::Result<ServiceServer<Req, Resp>> {
    ServiceServer::new(participant, name, qos.clone())
}

fn oneway_server<Req>(
    participant: &Arc<Participant>,
    name: &str,
    qos: &QoS,
) -> simbus::Result<OnewayServer<Req>> {
    ServiceServer::oneway(participant, name, qos.clone())
}

/// Runtime side of the controller channels.
pub struct ControllerEndpoints {
    pub session_start: ServiceClient<VdcSessionRequest, SessionRequestStatus>,
    pub session_close: OnewayClient<VdcSessionCloseRequest>,
    pub run:
        ServiceClient<RunControllerAndVehicleModelRequest, RunControllerAndVehicleModelResponse>,
    pub version: ServiceClient<VersionRequest, VersionResponse>,
    pub shutdown: OnewayClient<ShutdownRequest>,
}

impl ControllerEndpoints {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        timeout: Option<Duration>,
    ) -> simbus::Result<Self> {
        Ok(Self {
            session_start: client(participant, "controller/session_start", &qos.session, timeout)?,
            session_close: oneway_client(participant, "controller/session_close", &qos.data)?,
            run: client(participant, "controller/run", &qos.data, timeout)?,
            version: client(participant, "controller/version", &qos.data, timeout)?,
            shutdown: oneway_client(participant, "controller/shutdown", &qos.data)?,
        })
    }
}

/// Service side of the controller channels.
pub struct ControllerServerEndpoints {
    pub session_start: ServiceServer<VdcSessionRequest, SessionRequestStatus>,
    pub session_close: OnewayServer<VdcSessionCloseRequest>,
    pub run:
        ServiceServer<RunControllerAndVehicleModelRequest, RunControllerAndVehicleModelResponse>,
    pub version: ServiceServer<VersionRequest, VersionResponse>,
    pub shutdown: OnewayServer<ShutdownRequest>,
}

impl ControllerServerEndpoints {
    pub fn new(participant: &Arc<Participant>, qos: &ChannelQos) -> simbus::Result<Self> {
        Ok(Self {
            session_start: server(participant, "controller/session_start", &qos.session)?,
            session_close: oneway_server(participant, "controller/session_close", &qos.data)?,
            run: server(participant, "controller/run", &qos.data)?,
            version: server(participant, "controller/version", &qos.data)?,
            shutdown: oneway_server(participant, "controller/shutdown", &qos.data)?,
        })
    }
}

/// Runtime side of the driver channels.
pub struct DriverEndpoints {
    pub session_start: ServiceClient<DriveSessionRequest, SessionRequestStatus>,
    pub session_close: OnewayClient<DriveSessionCloseRequest>,
    pub image: OnewayClient<RolloutCameraImage>,
    pub egomotion: OnewayClient<RolloutEgoTrajectory>,
    pub route: OnewayClient<RouteRequest>,
    pub ground_truth: OnewayClient<GroundTruthRequest>,
    pub drive: ServiceClient<DriveRequest, DriveResponse>,
    pub version: ServiceClient<VersionRequest, VersionResponse>,
    pub shutdown: OnewayClient<ShutdownRequest>,
}

impl DriverEndpoints {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        timeout: Option<Duration>,
    ) -> simbus::Result<Self> {
        Ok(Self {
            session_start: client(participant, "driver/session_start", &qos.session, timeout)?,
            session_close: oneway_client(participant, "driver/session_close", &qos.data)?,
            image: oneway_client(participant, "driver/image_observation", &qos.data)?,
            egomotion: oneway_client(participant, "driver/egomotion", &qos.data)?,
            route: oneway_client(participant, "driver/route", &qos.data)?,
            ground_truth: oneway_client(participant, "driver/ground_truth", &qos.data)?,
            drive: client(participant, "driver/drive", &qos.data, timeout)?,
            version: client(participant, "driver/version", &qos.data, timeout)?,
            shutdown: oneway_client(participant, "driver/shutdown", &qos.data)?,
        })
    }
}

/// Service side of the driver channels.
pub struct DriverServerEndpoints {
    pub session_start: ServiceServer<DriveSessionRequest, SessionRequestStatus>,
    pub session_close: OnewayServer<DriveSessionCloseRequest>,
    pub image: OnewayServer<RolloutCameraImage>,
    pub egomotion: OnewayServer<RolloutEgoTrajectory>,
    pub route: OnewayServer<RouteRequest>,
    pub ground_truth: OnewayServer<GroundTruthRequest>,
    pub drive: ServiceServer<DriveRequest, DriveResponse>,
    pub version: ServiceServer<VersionRequest, VersionResponse>,
    pub shutdown: OnewayServer<ShutdownRequest>,
}

impl DriverServerEndpoints {
    pub fn new(participant: &Arc<Participant>, qos: &ChannelQos) -> simbus::Result<Self> {
        Ok(Self {
            session_start: server(participant, "driver/session_start", &qos.session)?,
            session_close: oneway_server(participant, "driver/session_close", &qos.data)?,
            image: oneway_server(participant, "driver/image_observation", &qos.data)?,
            egomotion: oneway_server(participant, "driver/egomotion", &qos.data)?,
            route: oneway_server(participant, "driver/route", &qos.data)?,
            ground_truth: oneway_server(participant, "driver/ground_truth", &qos.data)?,
            drive: server(participant, "driver/drive", &qos.data)?,
            version: server(participant, "driver/version", &qos.data)?,
            shutdown: oneway_server(participant, "driver/shutdown", &qos.data)?,
        })
    }
}

/// Runtime side of the physics channels.
pub struct PhysicsEndpoints {
    pub ground_intersection:
        ServiceClient<PhysicsGroundIntersectionRequest, PhysicsGroundIntersectionReturn>,
    pub available_scenes: ServiceClient<AvailableScenesRequest, AvailableScenesResponse>,
    pub version: ServiceClient<VersionRequest, VersionResponse>,
    pub shutdown: OnewayClient<ShutdownRequest>,
}

impl PhysicsEndpoints {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        timeout: Option<Duration>,
    ) -> simbus::Result<Self> {
        Ok(Self {
            ground_intersection: client(
                participant,
                "physics/ground_intersection",
                &qos.data,
                timeout,
            )?,
            available_scenes: client(participant, "physics/available_scenes", &qos.data, timeout)?,
            version: client(participant, "physics/version", &qos.data, timeout)?,
            shutdown: oneway_client(participant, "physics/shutdown", &qos.data)?,
        })
    }
}

/// Service side of the physics channels.
pub struct PhysicsServerEndpoints {
    pub ground_intersection:
        ServiceServer<PhysicsGroundIntersectionRequest, PhysicsGroundIntersectionReturn>,
    pub available_scenes: ServiceServer<AvailableScenesRequest, AvailableScenesResponse>,
    pub version: ServiceServer<VersionRequest, VersionResponse>,
    pub shutdown: OnewayServer<ShutdownRequest>,
}

impl PhysicsServerEndpoints {
    pub fn new(participant: &Arc<Participant>, qos: &ChannelQos) -> simbus::Result<Self> {
        Ok(Self {
            ground_intersection: server(participant, "physics/ground_intersection", &qos.data)?,
            available_scenes: server(participant, "physics/available_scenes", &qos.data)?,
            version: server(participant, "physics/version", &qos.data)?,
            shutdown: oneway_server(participant, "physics/shutdown", &qos.data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbus::transport::LocalDomain;
    use simbus::{ChannelMode, Durability};

    #[test]
    fn test_driver_channel_layout() {
        let participant =
            Participant::with_transport("endpoints", Arc::new(LocalDomain::new(0))).unwrap();
        let qos = ChannelQos::default();
        let server = DriverServerEndpoints::new(&participant, &qos).unwrap();

        assert_eq!(server.session_start.channel().request_topic, "driver/session_start/req");
        assert_eq!(
            server.session_start.channel().qos.durability,
            Durability::TransientLocal
        );
        assert_eq!(server.image.channel().mode, ChannelMode::Oneway);
        assert_eq!(server.drive.channel().reply_topic.as_deref(), Some("driver/drive/resp"));
        assert_eq!(server.drive.channel().qos.durability, Durability::Volatile);

        let client =
            DriverEndpoints::new(&participant, &qos, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(client.drive.default_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(client.shutdown.channel().mode, ChannelMode::Oneway);
    }
}
