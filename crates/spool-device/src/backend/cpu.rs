// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # CPU Backend
//!
//! Host-memory backend. Buffers are plain `Array2<f32>` and the column kernels fan out
//! over rayon, one task per output column.

use ndarray::{s, Array2, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::ops::Range;

use super::{BackendStats, DeviceBackend, DeviceBuffer, ImageGeometry};
use crate::error::{DeviceError, DeviceResult};

/// Feature-major buffer in host memory
#[derive(Debug, Clone)]
pub struct CpuBuffer {
    data: Array2<f32>,
}

impl CpuBuffer {
    /// Raw feature-major contents
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }
}

impl DeviceBuffer for CpuBuffer {
    fn rows(&self) -> usize {
        self.data.nrows()
    }

    fn cols(&self) -> usize {
        self.data.ncols()
    }
}

/// CPU backend (rayon-parallel kernels)
pub struct CpuBackend {
    /// Backend name for logging
    name: String,

    /// Largest single allocation permitted, if bounded
    max_buffer_bytes: Option<usize>,

    stats: BackendStats,
}

impl CpuBackend {
    /// Create a new unbounded CPU backend
    pub fn new() -> Self {
        Self {
            name: "CPU (rayon)".to_string(),
            max_buffer_bytes: None,
            stats: BackendStats::default(),
        }
    }

    /// Create a CPU backend that refuses allocations above `bytes`
    pub fn with_buffer_limit(bytes: usize) -> Self {
        Self {
            max_buffer_bytes: Some(bytes),
            ..Self::new()
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_cols(cols: &Range<usize>, len: usize) -> DeviceResult<()> {
    if cols.start > cols.end || cols.end > len {
        return Err(DeviceError::IndexOutOfBounds {
            index: cols.end,
            len,
        });
    }
    Ok(())
}

impl DeviceBackend for CpuBackend {
    type Buffer = CpuBuffer;

    fn backend_name(&self) -> &str {
        &self.name
    }

    fn allocate(&mut self, rows: usize, cols: usize) -> DeviceResult<CpuBuffer> {
        let bytes = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(crate::ELEMENT_BYTES))
            .ok_or(DeviceError::OutOfMemory {
                requested_bytes: usize::MAX,
            })?;
        if let Some(limit) = self.max_buffer_bytes {
            if bytes > limit {
                return Err(DeviceError::OutOfMemory {
                    requested_bytes: bytes,
                });
            }
        }

        self.stats.allocations += 1;
        self.stats.bytes_allocated += bytes;
        tracing::trace!(rows, cols, bytes, "CPU buffer allocated");

        Ok(CpuBuffer {
            data: Array2::zeros((rows, cols)),
        })
    }

    fn upload_rows(
        &mut self,
        dst: &mut CpuBuffer,
        first_col: usize,
        rows: ArrayView2<'_, f32>,
    ) -> DeviceResult<()> {
        if rows.ncols() != dst.rows() {
            return Err(DeviceError::ShapeMismatch(format!(
                "host rows have width {}, buffer holds {} features",
                rows.ncols(),
                dst.rows()
            )));
        }
        let end = first_col + rows.nrows();
        check_cols(&(first_col..end), dst.cols())?;

        dst.data.slice_mut(s![.., first_col..end]).assign(&rows.t());
        self.stats.uploads += 1;
        Ok(())
    }

    fn download(&self, src: &CpuBuffer, cols: Range<usize>) -> DeviceResult<Array2<f32>> {
        check_cols(&cols, src.cols())?;
        Ok(src.data.slice(s![.., cols]).to_owned())
    }

    fn copy_columns(
        &mut self,
        src: &CpuBuffer,
        src_cols: Range<usize>,
        dst: &mut CpuBuffer,
        dst_first_col: usize,
    ) -> DeviceResult<()> {
        if src.rows() != dst.rows() {
            return Err(DeviceError::ShapeMismatch(format!(
                "copy between buffers of {} and {} features",
                src.rows(),
                dst.rows()
            )));
        }
        check_cols(&src_cols, src.cols())?;
        let dst_cols = dst_first_col..dst_first_col + src_cols.len();
        check_cols(&dst_cols, dst.cols())?;

        dst.data
            .slice_mut(s![.., dst_cols])
            .assign(&src.data.slice(s![.., src_cols]));
        Ok(())
    }

    fn normalize(
        &mut self,
        buf: &mut CpuBuffer,
        cols: Range<usize>,
        mean: &[f32],
        inv_std: &[f32],
    ) -> DeviceResult<()> {
        if mean.len() != buf.rows() || inv_std.len() != buf.rows() {
            return Err(DeviceError::ShapeMismatch(format!(
                "statistics of length {}/{} for {} features",
                mean.len(),
                inv_std.len(),
                buf.rows()
            )));
        }
        check_cols(&cols, buf.cols())?;

        buf.data
            .slice_mut(s![.., cols])
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(feature, mut row)| {
                let (m, k) = (mean[feature], inv_std[feature]);
                row.mapv_inplace(|x| (x - m) * k);
            });
        Ok(())
    }

    fn add_gaussian_noise(
        &mut self,
        buf: &mut CpuBuffer,
        cols: Range<usize>,
        std: f32,
        seed: u64,
    ) -> DeviceResult<()> {
        check_cols(&cols, buf.cols())?;
        let normal = Normal::new(0.0f32, std)
            .map_err(|e| DeviceError::InvalidParameters(format!("noise std {}: {}", std, e)))?;
        let mut rng = StdRng::seed_from_u64(seed);

        for value in buf.data.slice_mut(s![.., cols]).iter_mut() {
            *value += normal.sample(&mut rng);
        }
        Ok(())
    }

    fn swap_columns(&mut self, buf: &mut CpuBuffer, pairs: &[(usize, usize)]) -> DeviceResult<()> {
        let len = buf.cols();
        for &(a, b) in pairs {
            if a >= len || b >= len {
                return Err(DeviceError::IndexOutOfBounds {
                    index: a.max(b),
                    len,
                });
            }
            if a == b {
                continue;
            }
            let (mut left, mut right) = buf.data.multi_slice_mut((s![.., a], s![.., b]));
            Zip::from(&mut left)
                .and(&mut right)
                .for_each(|x, y| std::mem::swap(x, y));
        }
        Ok(())
    }

    fn gather_columns(
        &mut self,
        src: &CpuBuffer,
        index: ArrayView2<'_, usize>,
        dst: &mut CpuBuffer,
    ) -> DeviceResult<()> {
        let (window, n) = index.dim();
        let features = src.rows();
        if dst.rows() != window * features {
            return Err(DeviceError::ShapeMismatch(format!(
                "gather of {} x {} features into buffer of {} rows",
                window,
                features,
                dst.rows()
            )));
        }
        if n > dst.cols() {
            return Err(DeviceError::CapacityExceeded {
                requested: n,
                available: dst.cols(),
            });
        }
        if let Some(&bad) = index.iter().find(|&&i| i >= src.cols()) {
            return Err(DeviceError::IndexOutOfBounds {
                index: bad,
                len: src.cols(),
            });
        }

        let source = &src.data;
        dst.data
            .slice_mut(s![.., 0..n])
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(|(j, mut out)| {
                for w in 0..window {
                    out.slice_mut(s![w * features..(w + 1) * features])
                        .assign(&source.column(index[[w, j]]));
                }
            });
        Ok(())
    }

    fn crop_images(
        &mut self,
        src: &CpuBuffer,
        src_geometry: ImageGeometry,
        dst: &mut CpuBuffer,
        dst_geometry: ImageGeometry,
        offsets: &[(usize, usize)],
    ) -> DeviceResult<()> {
        if src.rows() != src_geometry.len() || dst.rows() != dst_geometry.len() {
            return Err(DeviceError::ShapeMismatch(format!(
                "crop geometry {:?} -> {:?} does not match buffers of {} and {} rows",
                src_geometry,
                dst_geometry,
                src.rows(),
                dst.rows()
            )));
        }
        if src_geometry.channels != dst_geometry.channels {
            return Err(DeviceError::ShapeMismatch(
                "crop cannot change channel count".to_string(),
            ));
        }
        let n = offsets.len();
        if n > src.cols() || n > dst.cols() {
            return Err(DeviceError::CapacityExceeded {
                requested: n,
                available: src.cols().min(dst.cols()),
            });
        }
        for &(ox, oy) in offsets {
            if ox + dst_geometry.width > src_geometry.width
                || oy + dst_geometry.height > src_geometry.height
            {
                return Err(DeviceError::InvalidParameters(format!(
                    "crop offset ({}, {}) leaves the {}x{} image",
                    ox, oy, src_geometry.width, src_geometry.height
                )));
            }
        }

        let channels = src_geometry.channels;
        let span = dst_geometry.width * channels;
        let source = &src.data;
        dst.data
            .slice_mut(s![.., 0..n])
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(|(j, mut out)| {
                let (ox, oy) = offsets[j];
                let column = source.column(j);
                for y in 0..dst_geometry.height {
                    let from = ((y + oy) * src_geometry.width + ox) * channels;
                    let to = y * span;
                    out.slice_mut(s![to..to + span])
                        .assign(&column.slice(s![from..from + span]));
                }
            });
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}
