// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Vehicle-simulation services on simbus
//!
//! A closed-loop driving simulation split into services that talk over
//! simbus channels:
//!
//! - **Controller**: advances each session's vehicle model along a plan
//! - **Driver**: collects observations and batches policy evaluation
//! - **Physics**: puts poses back on the scene's ground
//! - **Runtime**: clients, pre-flight checks and the rollout loop
//!
//! # Quick Start
//!
//! ```bash
//! # Two rollouts of 50 steps with the built-in backends
//! simbus-testbed run
//!
//! # Using a config file
//! simbus-testbed gen-config --output testbed.toml
//! simbus-testbed run --config testbed.toml --sessions 8
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "nightly"
//! request_timeout_ms = 5000
//!
//! [driver]
//! max_batch_size = 8
//! use_cameras = ["camera_front_wide"]
//!
//! [[physics.scenes]]
//! id = "flat-ground"
//! ground_height = 0.0
//!
//! [rollout]
//! scene_id = "flat-ground"
//! sessions = 4
//! steps = 100
//! ```

pub mod config;
pub mod controller;
pub mod driver;
pub mod endpoints;
pub mod error;
pub mod physics;
pub mod runtime;
pub mod testbed;
pub mod types;

pub use config::{ConfigError, TestbedConfig};
pub use controller::{ControllerService, KinematicVehicle, VehicleModel, VehicleModelFactory};
pub use driver::{ConstantVelocityPolicy, DriverService, DrivingPolicy};
pub use error::{Result, ServiceError};
pub use physics::{FlatGroundScenes, GroundModel, PhysicsService, SceneLoader};
pub use runtime::{find_scene_incompatibilities, ServiceClients, ServiceVersions};
pub use testbed::{Backends, RolloutReport, Testbed};
