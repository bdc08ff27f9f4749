// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Modality descriptions consumed by the readers.

use std::path::PathBuf;

use crate::window::WindowSpec;

/// One named data stream and the files backing it
#[derive(Debug, Clone, PartialEq)]
pub struct ModalitySource {
    pub name: String,
    /// Values per row
    pub row_width: usize,
    /// Files in round-robin order
    pub files: Vec<PathBuf>,
    /// Context window; zero on both sides for non-sequence data
    pub window: WindowSpec,
}

impl ModalitySource {
    pub fn new(name: impl Into<String>, row_width: usize, files: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            row_width,
            files,
            window: WindowSpec::default(),
        }
    }

    pub fn with_window(mut self, left: usize, right: usize) -> Self {
        self.window = WindowSpec::new(left, right);
        self
    }
}

/// Row count shared by all modalities for a tier of `capacity_bytes`
pub fn rows_for_capacity(capacity_bytes: u64, sources: &[ModalitySource]) -> usize {
    let bytes_per_row: u64 = sources
        .iter()
        .map(|s| (s.row_width * spool_device::ELEMENT_BYTES) as u64)
        .sum();
    if bytes_per_row == 0 {
        return 0;
    }
    (capacity_bytes / bytes_per_row) as usize
}
