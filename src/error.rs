// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use spool_cache::CacheError;
use spool_config::ConfigError;
use spool_device::DeviceError;

/// Errors raised while assembling or driving a pipeline
#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

pub type SpoolResult<T> = Result<T, SpoolError>;
