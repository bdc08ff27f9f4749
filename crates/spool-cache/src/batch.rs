// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Batches handed out by the cache tiers.
//!
//! Every batch borrows the tier that produced it, so it must be dropped (or copied with one
//! of the `to_*` helpers) before the next `get` on that tier.

use ndarray::{Array2, ArrayView2};
use spool_device::{DeviceBackend, DeviceResult, DeviceView};
use std::collections::BTreeMap;

use crate::window::WindowSpec;

/// Host rows for every modality, sample-major
#[derive(Debug)]
pub struct HostBatch<'a> {
    pub(crate) modalities: Vec<(&'a str, ArrayView2<'a, f32>)>,
    pub(crate) end_of_epoch: bool,
}

impl<'a> HostBatch<'a> {
    /// Rows per modality
    pub fn len(&self) -> usize {
        self.modalities.first().map_or(0, |(_, rows)| rows.nrows())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// This batch consumed the last rows of a pass over the dataset
    pub fn end_of_epoch(&self) -> bool {
        self.end_of_epoch
    }

    pub fn get(&self, name: &str) -> Option<ArrayView2<'a, f32>> {
        self.modalities
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, rows)| rows.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, ArrayView2<'a, f32>)> + '_ {
        self.modalities.iter().map(|(n, rows)| (*n, rows.clone()))
    }

    /// Copy out of the tier buffer
    pub fn to_owned(&self) -> BTreeMap<String, Array2<f32>> {
        self.iter()
            .map(|(n, rows)| (n.to_string(), rows.to_owned()))
            .collect()
    }
}

/// Device views for every modality, feature-major
pub struct DeviceBatch<'a, B: DeviceBackend> {
    pub(crate) modalities: Vec<(&'a str, DeviceView<'a, B>)>,
    pub(crate) end_of_epoch: bool,
}

impl<'a, B: DeviceBackend> DeviceBatch<'a, B> {
    /// Samples per modality
    pub fn len(&self) -> usize {
        self.modalities.first().map_or(0, |(_, view)| view.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end_of_epoch(&self) -> bool {
        self.end_of_epoch
    }

    pub fn get(&self, name: &str) -> Option<&DeviceView<'a, B>> {
        self.modalities
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, view)| view)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &DeviceView<'a, B>)> + '_ {
        self.modalities.iter().map(|(n, view)| (*n, view))
    }

    /// Download every modality in sample-major layout
    pub fn to_host_rows(&self) -> DeviceResult<BTreeMap<String, Array2<f32>>> {
        self.modalities
            .iter()
            .map(|(n, view)| Ok((n.to_string(), view.to_rows()?)))
            .collect()
    }
}

/// Host rows of one modality plus the valid centers inside them
#[derive(Debug)]
pub struct WindowedRows<'a> {
    pub name: &'a str,
    pub window: WindowSpec,
    /// Rows spanning every window of the batch
    pub rows: ArrayView2<'a, f32>,
    /// Center rows, relative to `rows`
    pub centers: Vec<usize>,
}

impl WindowedRows<'_> {
    /// Stack each center's window into one row of `window.size() * width` values
    pub fn windows(&self) -> Array2<f32> {
        let width = self.rows.ncols();
        let size = self.window.size();
        let mut out = Array2::zeros((self.centers.len(), size * width));
        for (i, &center) in self.centers.iter().enumerate() {
            let first = center - self.window.left;
            for w in 0..size {
                out.slice_mut(ndarray::s![i, w * width..(w + 1) * width])
                    .assign(&self.rows.row(first + w));
            }
        }
        out
    }
}

/// Output of the windowed row cache
#[derive(Debug)]
pub struct WindowedHostBatch<'a> {
    pub(crate) modalities: Vec<WindowedRows<'a>>,
    pub(crate) end_of_epoch: bool,
}

impl<'a> WindowedHostBatch<'a> {
    /// Valid centers per modality
    pub fn len(&self) -> usize {
        self.modalities.first().map_or(0, |m| m.centers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end_of_epoch(&self) -> bool {
        self.end_of_epoch
    }

    pub fn get(&self, name: &str) -> Option<&WindowedRows<'a>> {
        self.modalities.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowedRows<'a>> {
        self.modalities.iter()
    }
}

/// One modality's gathered window block and the frame-buffer centers it was built from
pub struct WindowBlock<'a, B: DeviceBackend> {
    pub name: &'a str,
    pub window: WindowSpec,
    /// `(window * width) x batch` block
    pub view: DeviceView<'a, B>,
    /// Center columns in the tier's frame buffer
    pub centers: Vec<usize>,
}

/// Output of the windowed device cache
pub struct WindowedDeviceBatch<'a, B: DeviceBackend> {
    pub(crate) blocks: Vec<WindowBlock<'a, B>>,
    pub(crate) end_of_epoch: bool,
}

impl<'a, B: DeviceBackend> WindowedDeviceBatch<'a, B> {
    pub fn len(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.view.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end_of_epoch(&self) -> bool {
        self.end_of_epoch
    }

    pub fn get(&self, name: &str) -> Option<&WindowBlock<'a, B>> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowBlock<'a, B>> {
        self.blocks.iter()
    }

    /// Download every block, one row of `window * width` values per center
    pub fn to_host_rows(&self) -> DeviceResult<BTreeMap<String, Array2<f32>>> {
        self.blocks
            .iter()
            .map(|b| Ok((b.name.to_string(), b.view.to_rows()?)))
            .collect()
    }
}
