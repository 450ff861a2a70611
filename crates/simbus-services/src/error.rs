// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::config::ConfigError;
use thiserror::Error;

/// Service-level errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bus error: {0}")]
    Bus(#[from] simbus::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Scene {0} not available")]
    UnknownScene(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Scenario validation failed: {0:?}")]
    Incompatible(Vec<String>),
}

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
