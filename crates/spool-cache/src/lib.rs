// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Spool Cache
//!
//! Bounded-memory streaming cache feeding fixed-size batches to a device-resident training
//! loop from datasets larger than both device and host memory.
//!
//! ## Tiers (leaf first)
//!
//! - [`BackingStoreReader`] / [`SequenceReader`]: chunked reads over each modality's files
//! - [`RowCache`] / [`WindowedRowCache`]: host-memory tier with shared-permutation shuffle
//! - [`DeviceCache`] / [`WindowedDeviceCache`]: device tier with in-place preprocessing
//!
//! Data flows bottom-up on demand: a `get` on a device tier refills from its host tier,
//! which refills from its reader. Every tier returns the same number of samples for every
//! modality on every call.
//!
//! ## Example
//!
//! ```no_run
//! use spool_cache::{BackingStoreReader, DeviceCache, ModalitySource, RowCache, TierOptions};
//! use spool_device::CpuBackend;
//!
//! # fn main() -> spool_cache::CacheResult<()> {
//! let sources = vec![
//!     ModalitySource::new("features", 40, vec!["feats.bin".into()]),
//!     ModalitySource::new("labels", 1, vec!["labels.bin".into()]),
//! ];
//! let host = RowCache::new(BackingStoreReader::new(sources)?, TierOptions::new(100_000))?;
//! let mut device = DeviceCache::new(host, CpuBackend::new(), TierOptions::new(10_000), vec![])?;
//! let batch = device.get(256, false)?;
//! assert_eq!(batch.len(), 256);
//! # Ok(())
//! # }
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod batch;
pub mod chunk;
pub mod device_cache;
pub mod error;
pub mod preprocess;
pub mod reader;
pub mod row_cache;
pub mod sequence;
pub mod shuffle;
pub mod source;
pub mod stats;
pub mod window;
pub mod windowed_device_cache;
pub mod windowed_row_cache;

pub use batch::{
    DeviceBatch, HostBatch, WindowBlock, WindowedDeviceBatch, WindowedHostBatch, WindowedRows,
};
pub use chunk::{
    encode_binary_chunk, Chunk, ChunkDecoder, DecodedChunk, DecoderRegistry, SparseChunk,
};
pub use device_cache::DeviceCache;
pub use error::{CacheError, CacheResult, ErrorKind};
pub use preprocess::{NormalizationStats, Preprocess, ShiftSpec, STD_EPSILON};
pub use reader::{BackingStoreReader, ReadMode, ReadOutcome, ReadStatus};
pub use row_cache::{RowCache, TierOptions};
pub use sequence::{SequenceReader, UtteranceBatch};
pub use source::{rows_for_capacity, ModalitySource};
pub use stats::TierStats;
pub use window::{BoundaryList, CenterTake, UtteranceCursor, WindowSpec};
pub use windowed_device_cache::{WindowedDeviceCache, WindowedDeviceOptions};
pub use windowed_row_cache::{UtteranceBlock, UtteranceRows, WindowedRowCache};
