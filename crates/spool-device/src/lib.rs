// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Spool Device Layer
//!
//! The device tier treats accelerator memory as an opaque capability: allocate a buffer,
//! copy rows in and out, run a handful of elementwise kernels, gather columns by index.
//! Everything above this crate is written against [`DeviceBackend`], so a cache tier never
//! knows whether its buffers live in host RAM or in VRAM.
//!
//! ## Layout
//!
//! Device buffers are feature-major: a buffer of `rows x cols` holds `cols` samples of
//! `rows` features each. Host data is sample-major and is transposed on upload.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backend;
pub mod error;
pub mod view;

pub use backend::{BackendStats, BackendType, CpuBackend, CpuBuffer, DeviceBackend, DeviceBuffer, ImageGeometry};
pub use error::{DeviceError, DeviceResult};
pub use view::DeviceView;

/// Bytes per element held in device buffers
pub const ELEMENT_BYTES: usize = std::mem::size_of::<f32>();
