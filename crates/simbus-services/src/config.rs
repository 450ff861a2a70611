// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Testbed configuration.
//!
//! Supports both programmatic and file-based configuration.

use crate::endpoints::ChannelQos;
use serde::{Deserialize, Serialize};
use simbus::participant::MAX_DOMAIN_ID;
use simbus::qos::{reliable_qos, session_qos};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Testbed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestbedConfig {
    /// Testbed name (for identification).
    #[serde(default = "default_name")]
    pub name: String,

    /// Domain the services and the runtime meet on.
    #[serde(default)]
    pub domain_id: u32,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Runtime-side request timeout (milliseconds, 0 = wait forever).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub physics: PhysicsConfig,

    #[serde(default)]
    pub rollout: RolloutConfig,
}

fn default_name() -> String {
    "simbus-testbed".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            domain_id: 0,
            log_level: default_log_level(),
            request_timeout_ms: default_request_timeout_ms(),
            transport: TransportConfig::default(),
            driver: DriverConfig::default(),
            physics: PhysicsConfig::default(),
            rollout: RolloutConfig::default(),
        }
    }
}

impl TestbedConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain_id > MAX_DOMAIN_ID {
            return Err(ConfigError::Invalid(format!(
                "domain_id {} exceeds {}",
                self.domain_id, MAX_DOMAIN_ID
            )));
        }
        if self.transport.history_depth == 0 {
            return Err(ConfigError::Invalid(
                "transport.history_depth must be at least 1".into(),
            ));
        }

        let driver = &self.driver;
        if driver.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "driver.max_batch_size must be at least 1".into(),
            ));
        }
        if driver.context_length == 0 || driver.subsample_factor == 0 {
            return Err(ConfigError::Invalid(
                "driver.context_length and driver.subsample_factor must be at least 1".into(),
            ));
        }
        if driver.use_cameras.is_empty() {
            return Err(ConfigError::Invalid("driver.use_cameras is empty".into()));
        }
        if driver.output_frequency_hz.is_nan() || driver.output_frequency_hz <= 0.0 {
            return Err(ConfigError::Invalid(
                "driver.output_frequency_hz must be positive".into(),
            ));
        }
        if driver.command_distance_threshold < 0.0 || driver.min_lookahead_distance < 0.0 {
            return Err(ConfigError::Invalid(
                "driver route distances must not be negative".into(),
            ));
        }

        if self.physics.cache_size == 0 {
            return Err(ConfigError::Invalid(
                "physics.cache_size must be at least 1".into(),
            ));
        }
        for (i, scene) in self.physics.scenes.iter().enumerate() {
            if scene.id.is_empty() {
                return Err(ConfigError::Invalid(format!("Scene {} has an empty id", i)));
            }
            if self.physics.scenes[..i].iter().any(|s| s.id == scene.id) {
                return Err(ConfigError::Invalid(format!(
                    "Scene '{}' is defined twice",
                    scene.id
                )));
            }
        }

        let rollout = &self.rollout;
        if rollout.sessions == 0 || rollout.steps == 0 {
            return Err(ConfigError::Invalid(
                "rollout.sessions and rollout.steps must be at least 1".into(),
            ));
        }
        if rollout.step_us == 0 {
            return Err(ConfigError::Invalid("rollout.step_us must be positive".into()));
        }
        if rollout.scene_id.is_empty() {
            return Err(ConfigError::Invalid("rollout.scene_id is empty".into()));
        }
        Ok(())
    }

    /// Runtime-side request timeout, `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// QoS profiles for every service channel.
    pub fn channel_qos(&self) -> ChannelQos {
        let blocking = Duration::from_millis(self.transport.max_blocking_ms);
        ChannelQos {
            session: session_qos().max_blocking_time(blocking),
            data: reliable_qos()
                .max_blocking_time(blocking)
                .keep_last(self.transport.history_depth),
        }
    }
}

/// Transport settings shared by every channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// KEEP_LAST depth of data channels.
    #[serde(default = "default_history_depth")]
    pub history_depth: u32,

    /// How long a reliable publish may block (milliseconds).
    #[serde(default = "default_max_blocking_ms")]
    pub max_blocking_ms: u64,
}

fn default_history_depth() -> u32 {
    32
}

fn default_max_blocking_ms() -> u64 {
    1_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
            max_blocking_ms: default_max_blocking_ms(),
        }
    }
}

/// Driving-policy service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Largest batch handed to the policy at once.
    pub max_batch_size: usize,
    /// Frames per camera the policy looks at.
    pub context_length: usize,
    /// Keep every n-th frame.
    pub subsample_factor: usize,
    /// Cameras the policy consumes; every session must provide them.
    pub use_cameras: Vec<String>,
    /// Rate of the predicted trajectory.
    pub output_frequency_hz: f64,
    /// Predicted points per drive.
    pub horizon_steps: usize,
    /// Derive turn commands from route waypoints.
    pub use_waypoint_commands: bool,
    /// Lateral offset (m) beyond which a waypoint means a turn.
    pub command_distance_threshold: f64,
    /// Waypoints closer than this (m) are ignored for commands.
    pub min_lookahead_distance: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 4,
            context_length: 1,
            subsample_factor: 1,
            use_cameras: vec!["camera_front_wide".to_string()],
            output_frequency_hz: 10.0,
            horizon_steps: 20,
            use_waypoint_commands: true,
            command_distance_threshold: 2.0,
            min_lookahead_distance: 5.0,
        }
    }
}

/// Physics service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Scene backends kept loaded.
    pub cache_size: usize,
    pub scenes: Vec<SceneConfig>,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            cache_size: 16,
            scenes: vec![SceneConfig {
                id: "flat-ground".to_string(),
                ground_height: 0.0,
            }],
        }
    }
}

/// A flat-ground scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    pub id: String,
    #[serde(default)]
    pub ground_height: f64,
}

/// Rollouts driven by the testbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub scene_id: String,
    /// Concurrent rollouts.
    pub sessions: usize,
    /// Control steps per rollout.
    pub steps: usize,
    /// Simulated time per step (microseconds).
    pub step_us: u64,
    /// Initial forward speed (m/s).
    pub initial_speed: f64,
    pub random_seed: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            scene_id: "flat-ground".to_string(),
            sessions: 2,
            steps: 50,
            step_us: 100_000,
            initial_speed: 5.0,
            random_seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbus::Reliability;

    #[test]
    fn test_default_config_is_valid() {
        TestbedConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TestbedConfig = toml::from_str(
            r#"
            name = "ci"
            request_timeout_ms = 0

            [driver]
            max_batch_size = 8

            [[physics.scenes]]
            id = "hill"
            ground_height = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "ci");
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.driver.max_batch_size, 8);
        assert_eq!(config.driver.context_length, 1);
        assert_eq!(config.physics.cache_size, 16);
        assert_eq!(config.physics.scenes.len(), 1);
        assert_eq!(config.transport.history_depth, 32);
    }

    #[test]
    fn test_validation() {
        let mut config = TestbedConfig::default();
        config.domain_id = 233;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = TestbedConfig::default();
        config.driver.use_cameras.clear();
        assert!(config.validate().is_err());

        let mut config = TestbedConfig::default();
        config.physics.scenes.push(config.physics.scenes[0].clone());
        assert!(config.validate().is_err());

        let mut config = TestbedConfig::default();
        config.rollout.sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_qos() {
        let mut config = TestbedConfig::default();
        config.transport.history_depth = 8;
        config.transport.max_blocking_ms = 250;
        let qos = config.channel_qos();

        assert_eq!(qos.data.history.depth(), Some(8));
        assert_eq!(qos.session.history.depth(), Some(1));
        assert_eq!(
            qos.data.reliability,
            Reliability::Reliable {
                max_blocking_time: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string_pretty(&TestbedConfig::default()).expect("serialize");
        assert!(toml_str.contains("max_batch_size = 4"));
        let back: TestbedConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(back, TestbedConfig::default());
    }
}
