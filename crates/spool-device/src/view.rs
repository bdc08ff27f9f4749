// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Borrowed views over device buffers.
//!
//! A view borrows both the backend and the buffer, so it cannot outlive the next call that
//! mutates the owning cache.

use ndarray::Array2;
use std::ops::Range;

use crate::backend::{DeviceBackend, DeviceBuffer};
use crate::error::DeviceResult;

/// A column range of a device buffer
pub struct DeviceView<'a, B: DeviceBackend> {
    backend: &'a B,
    buffer: &'a B::Buffer,
    cols: Range<usize>,
}

impl<'a, B: DeviceBackend> DeviceView<'a, B> {
    pub fn new(backend: &'a B, buffer: &'a B::Buffer, cols: Range<usize>) -> Self {
        Self {
            backend,
            buffer,
            cols,
        }
    }

    /// Number of samples in the view
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Features per sample
    pub fn features(&self) -> usize {
        self.buffer.rows()
    }

    /// Column range inside the underlying buffer
    pub fn columns(&self) -> Range<usize> {
        self.cols.clone()
    }

    pub fn buffer(&self) -> &'a B::Buffer {
        self.buffer
    }

    /// Copy to the host in device layout (`features x samples`)
    pub fn to_host(&self) -> DeviceResult<Array2<f32>> {
        self.backend.download(self.buffer, self.cols.clone())
    }

    /// Copy to the host in sample-major layout (`samples x features`)
    pub fn to_rows(&self) -> DeviceResult<Array2<f32>> {
        let host = self.to_host()?;
        Ok(host.t().as_standard_layout().into_owned())
    }
}

impl<B: DeviceBackend> std::fmt::Debug for DeviceView<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceView")
            .field("backend", &self.backend.backend_name())
            .field("features", &self.features())
            .field("cols", &self.cols)
            .finish()
    }
}
