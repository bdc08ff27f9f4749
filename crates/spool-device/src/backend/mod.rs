// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Device Backend Abstraction
//!
//! Provides a unified interface for device memory backends. Cache tiers use this trait
//! to hold their buffers and to run the cheap in-place preprocessing kernels without
//! caring which hardware sits underneath.

mod cpu;

pub use cpu::{CpuBackend, CpuBuffer};

use ndarray::{Array2, ArrayView2};
use std::ops::Range;

use crate::error::{DeviceError, DeviceResult};

/// A 2-D buffer living in device memory (`rows` features by `cols` samples)
pub trait DeviceBuffer: Send {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;

    fn size_bytes(&self) -> usize {
        self.rows() * self.cols() * crate::ELEMENT_BYTES
    }
}

/// Geometry of one sample interpreted as an image, stored `(y, x, channel)` row-major
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGeometry {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageGeometry {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Features per sample
    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geometry after trimming `crop_y` rows and `crop_x` columns from each side
    pub fn cropped(&self, crop_x: usize, crop_y: usize) -> DeviceResult<ImageGeometry> {
        if 2 * crop_x >= self.width || 2 * crop_y >= self.height {
            return Err(DeviceError::InvalidParameters(format!(
                "crop ({}, {}) consumes a {}x{} image",
                crop_x, crop_y, self.width, self.height
            )));
        }
        Ok(ImageGeometry {
            height: self.height - 2 * crop_y,
            width: self.width - 2 * crop_x,
            channels: self.channels,
        })
    }
}

/// Allocation counters reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Number of `allocate` calls that succeeded
    pub allocations: usize,
    /// Sum of bytes handed out by those calls
    pub bytes_allocated: usize,
    /// Host to device row uploads
    pub uploads: usize,
}

/// Device backend trait - abstracts where tier buffers live and how kernels run on them
///
/// All column ranges are in samples. Kernels operate in place unless they take a
/// separate destination buffer.
pub trait DeviceBackend: Send {
    /// Buffer type owned by cache tiers
    type Buffer: DeviceBuffer;

    /// Get backend type name for logging/debugging
    fn backend_name(&self) -> &str;

    /// Allocate a zeroed `rows x cols` buffer
    fn allocate(&mut self, rows: usize, cols: usize) -> DeviceResult<Self::Buffer>;

    /// Copy sample-major host rows into columns `first_col..first_col + rows.nrows()`
    fn upload_rows(
        &mut self,
        dst: &mut Self::Buffer,
        first_col: usize,
        rows: ArrayView2<'_, f32>,
    ) -> DeviceResult<()>;

    /// Copy columns back to the host, feature-major (`buffer.rows() x cols.len()`)
    fn download(&self, src: &Self::Buffer, cols: Range<usize>) -> DeviceResult<Array2<f32>>;

    /// Device-to-device copy of a column range
    fn copy_columns(
        &mut self,
        src: &Self::Buffer,
        src_cols: Range<usize>,
        dst: &mut Self::Buffer,
        dst_first_col: usize,
    ) -> DeviceResult<()>;

    /// `x = (x - mean) * inv_std` per feature row over `cols`
    fn normalize(
        &mut self,
        buf: &mut Self::Buffer,
        cols: Range<usize>,
        mean: &[f32],
        inv_std: &[f32],
    ) -> DeviceResult<()>;

    /// Add `N(0, std^2)` noise drawn from a stream seeded with `seed`
    fn add_gaussian_noise(
        &mut self,
        buf: &mut Self::Buffer,
        cols: Range<usize>,
        std: f32,
        seed: u64,
    ) -> DeviceResult<()>;

    /// Swap each pair of columns
    fn swap_columns(&mut self, buf: &mut Self::Buffer, pairs: &[(usize, usize)]) -> DeviceResult<()>;

    /// Windowed gather.
    ///
    /// `index` is `(window, n)`. Output column `j` is the vertical concatenation of source
    /// columns `index[[0, j]], index[[1, j]], ...`, so `dst.rows()` must equal
    /// `window * src.rows()` and `dst.cols() >= n`.
    fn gather_columns(
        &mut self,
        src: &Self::Buffer,
        index: ArrayView2<'_, usize>,
        dst: &mut Self::Buffer,
    ) -> DeviceResult<()>;

    /// Crop columns `0..offsets.len()` of `src` into `dst`.
    ///
    /// Each source column is an image with geometry `src_geometry`; `offsets[j]` is the
    /// `(x, y)` top-left corner of the `dst_geometry` window cut from column `j`.
    fn crop_images(
        &mut self,
        src: &Self::Buffer,
        src_geometry: ImageGeometry,
        dst: &mut Self::Buffer,
        dst_geometry: ImageGeometry,
        offsets: &[(usize, usize)],
    ) -> DeviceResult<()>;

    /// Allocation and transfer counters
    fn stats(&self) -> BackendStats;
}

/// Backend type enum for construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Host memory, rayon-parallel kernels
    Cpu,

    /// Pick the best backend compiled in
    #[default]
    Auto,
}

impl BackendType {
    /// Resolve `Auto` to a concrete backend
    pub fn resolve(self) -> BackendType {
        match self {
            BackendType::Auto => {
                tracing::debug!("Backend auto-selection: CPU (only backend compiled in)");
                BackendType::Cpu
            }
            other => other,
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Cpu => write!(f, "CPU"),
            BackendType::Auto => write!(f, "Auto"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = DeviceError;

    fn from_str(s: &str) -> DeviceResult<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(BackendType::Cpu),
            "auto" => Ok(BackendType::Auto),
            _ => Err(DeviceError::InvalidBackend(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("CPU".parse::<BackendType>().unwrap(), BackendType::Cpu);
        assert_eq!("auto".parse::<BackendType>().unwrap(), BackendType::Auto);
        assert!(matches!(
            "tpu".parse::<BackendType>(),
            Err(DeviceError::InvalidBackend(_))
        ));
        assert_eq!(BackendType::Auto.resolve(), BackendType::Cpu);
    }

    #[test]
    fn test_image_geometry_crop() {
        let geometry = ImageGeometry::new(4, 6, 2);
        assert_eq!(geometry.len(), 48);
        let cropped = geometry.cropped(1, 1).unwrap();
        assert_eq!(cropped, ImageGeometry::new(2, 4, 2));
        assert!(geometry.cropped(3, 0).is_err());
    }
}
