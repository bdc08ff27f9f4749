// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Spool - Bounded-Memory Streaming Batch Cache
//!
//! Spool feeds fixed-size batches to a device-resident training loop from datasets that are
//! larger than both device and host memory. Data moves through three tiers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Backing store: chunk files per modality                │
//! │  (binary / text / sparse COO, read round-robin)         │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Host tier: RowCache / WindowedRowCache                 │
//! │  (shared-permutation shuffle across modalities)         │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Device tier: DeviceCache / WindowedDeviceCache         │
//! │  (normalize, noise, crop, pairwise-swap shuffle)        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spool::Pipeline;
//!
//! let mut pipeline = Pipeline::load(None)?;  // finds spool.toml
//! loop {
//!     let batch = pipeline.next_batch(256)?;
//!     let features = batch.get("features").unwrap();
//!     // ... hand `features` to the training step
//!     if batch.end_of_epoch() {
//!         break;
//!     }
//! }
//! # Ok::<(), spool::SpoolError>(())
//! ```
//!
//! ## Feature Flags
//!
//! - **`file-logging`**: per-run log directories via `spool-observability`
//!
//! ## License
//!
//! Apache-2.0

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod pipeline;

pub use error::{SpoolError, SpoolResult};
pub use pipeline::{Pipeline, SequencePipeline};

// Re-export member crates
pub use spool_cache as cache;
pub use spool_config as config;
pub use spool_device as device;
pub use spool_observability as observability;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::cache::{
        BackingStoreReader, CacheError, DeviceBatch, DeviceCache, ModalitySource, Preprocess,
        RowCache, SequenceReader, TierOptions, TierStats, WindowedDeviceBatch,
        WindowedDeviceCache, WindowedDeviceOptions, WindowedRowCache,
    };
    pub use crate::config::{load_config, validate_config, SpoolConfig};
    pub use crate::device::{CpuBackend, DeviceBackend, DeviceView};
    pub use crate::{Pipeline, SequencePipeline, SpoolError, SpoolResult};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_facade_imports() {
        use crate::prelude::*;
        let options = TierOptions::new(4);
        assert_eq!(options.capacity_rows, 4);
        assert!(SpoolConfig::default().modalities.is_empty());
    }
}
