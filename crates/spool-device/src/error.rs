// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for device operations

/// Device errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Capacity exceeded
    #[error("Capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded {
        /// Requested columns
        requested: usize,
        /// Available columns
        available: usize,
    },

    /// Out of memory
    #[error("Out of memory: requested {requested_bytes} bytes")]
    OutOfMemory {
        /// Requested bytes
        requested_bytes: usize,
    },

    /// Operands disagree in shape
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An index points outside a buffer
    #[error("Index {index} out of bounds for {len} columns")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Unknown backend name
    #[error("Invalid backend: {0}")]
    InvalidBackend(String),
}

/// Result type for device operations
pub type DeviceResult<T> = core::result::Result<T, DeviceError>;
