// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the cache tiers

use spool_device::DeviceError;
use std::path::PathBuf;

/// Coarse classification of a [`CacheError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognized or corrupt chunk
    Decode,
    /// Width or utterance-count disagreement
    Shape,
    /// Request larger than a tier can hold
    Capacity,
    /// Filesystem failure
    Io,
    /// Device backend failure
    Device,
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Chunk could not be decoded
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// No decoder registered for the file extension
    #[error("No decoder registered for {path}")]
    UnknownFormat { path: PathBuf },

    /// Column count or utterance grouping disagrees with the configuration
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Request exceeds tier capacity
    #[error("Capacity exceeded: requested {requested}, available {available}")]
    Capacity { requested: usize, available: usize },

    /// A full pass over a modality produced no rows
    #[error("Modality '{0}' produced no rows in a full pass over its files")]
    EmptyDataset(String),

    /// Normalization statistics are missing or malformed
    #[error("Invalid normalization statistics: {0}")]
    Stats(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Decode { .. } | CacheError::UnknownFormat { .. } | CacheError::Stats(_) => {
                ErrorKind::Decode
            }
            CacheError::Shape(_) | CacheError::EmptyDataset(_) => ErrorKind::Shape,
            CacheError::Capacity { .. } => ErrorKind::Capacity,
            CacheError::Io(_) => ErrorKind::Io,
            CacheError::Device(DeviceError::CapacityExceeded { .. }) => ErrorKind::Capacity,
            CacheError::Device(DeviceError::ShapeMismatch(_)) => ErrorKind::Shape,
            CacheError::Device(_) => ErrorKind::Device,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CacheError::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            CacheError::UnknownFormat {
                path: PathBuf::from("a.xyz")
            }
            .kind(),
            ErrorKind::Decode
        );
        assert_eq!(CacheError::Shape("w".into()).kind(), ErrorKind::Shape);
        assert_eq!(
            CacheError::from(DeviceError::OutOfMemory { requested_bytes: 8 }).kind(),
            ErrorKind::Device
        );
        let err = CacheError::Capacity {
            requested: 12,
            available: 10,
        };
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert_eq!(err.to_string(), "Capacity exceeded: requested 12, available 10");
    }
}
