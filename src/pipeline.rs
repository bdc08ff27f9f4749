// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Pipeline Assembly
//!
//! Turns a validated [`SpoolConfig`] into a ready-to-use device tier. Both tiers share one
//! row count per tier across every modality, computed from the configured byte capacity.
//! The host tier shuffles with `seed`, the device tier with `seed + 1`.

use std::path::Path;

use spool_cache::{
    rows_for_capacity, BackingStoreReader, DeviceBatch, DeviceCache, ModalitySource,
    NormalizationStats, Preprocess, RowCache, SequenceReader, ShiftSpec, TierOptions, TierStats,
    WindowedDeviceBatch, WindowedDeviceCache, WindowedDeviceOptions, WindowedRowCache,
};
use spool_config::{load_config, validate_config, ConfigError, ModalityConfig, SpoolConfig};
use spool_device::{BackendType, CpuBackend, ImageGeometry};
use tracing::{debug, info};

use crate::error::SpoolResult;

fn sources(config: &SpoolConfig) -> Vec<ModalitySource> {
    config
        .modalities
        .iter()
        .map(|m| {
            ModalitySource::new(m.name.clone(), m.row_width, m.files.clone())
                .with_window(m.left_window, m.right_window)
        })
        .collect()
}

fn preprocess(modality: &ModalityConfig) -> SpoolResult<Preprocess> {
    let normalize = if modality.normalize {
        let Some(path) = modality.stats.as_deref() else {
            return Err(ConfigError::MissingRequired(format!(
                "modality '{}' normalizes without stats",
                modality.name
            ))
            .into());
        };
        Some(NormalizationStats::load(path)?)
    } else {
        None
    };

    let shift = modality.augment_shift.as_ref().map(|shift| {
        let [height, width, channels] = shift.image_shape;
        ShiftSpec {
            amount_x: shift.amount_x,
            amount_y: shift.amount_y,
            center_only: shift.center_only,
            image: ImageGeometry::new(height, width, channels),
        }
    });

    Ok(Preprocess {
        normalize,
        noise_std: modality.augment_noise.then_some(modality.noise_std),
        shift,
    })
}

fn tier(rows: usize, shuffle: bool, seed: u64) -> TierOptions {
    let options = TierOptions::new(rows);
    if shuffle {
        options.shuffled(seed)
    } else {
        options
    }
}

fn backend(config: &SpoolConfig) -> SpoolResult<CpuBackend> {
    let requested: BackendType = config.device.backend.parse()?;
    let selected = requested.resolve();
    debug!(%requested, %selected, "Device backend selected");
    Ok(CpuBackend::new())
}

struct Plan {
    sources: Vec<ModalitySource>,
    preprocess: Vec<Preprocess>,
    host: TierOptions,
    device: TierOptions,
    backend: CpuBackend,
}

impl Plan {
    fn new(config: &SpoolConfig) -> SpoolResult<Self> {
        let sources = sources(config);
        let preprocess = config
            .modalities
            .iter()
            .map(preprocess)
            .collect::<SpoolResult<Vec<_>>>()?;
        let seed = config.system.seed;
        let host_rows = rows_for_capacity(config.host.capacity.as_u64(), &sources);
        let device_rows = rows_for_capacity(config.device.capacity.as_u64(), &sources);
        info!(
            modalities = sources.len(),
            host_rows,
            device_rows,
            seed,
            "Assembling pipeline"
        );

        Ok(Self {
            sources,
            preprocess,
            host: tier(host_rows, config.host.shuffle, seed),
            device: tier(device_rows, config.device.shuffle, seed.wrapping_add(1)),
            backend: backend(config)?,
        })
    }
}

/// Host and device tiers for independent rows
pub struct Pipeline {
    cache: DeviceCache<CpuBackend>,
    allow_partial: bool,
}

impl Pipeline {
    pub fn from_config(config: &SpoolConfig) -> SpoolResult<Self> {
        validate_config(config)?;
        let plan = Plan::new(config)?;
        let host = RowCache::new(BackingStoreReader::new(plan.sources)?, plan.host)?;
        let cache = DeviceCache::new(host, plan.backend, plan.device, plan.preprocess)?;
        Ok(Self {
            cache,
            allow_partial: config.device.allow_partial_final_batch,
        })
    }

    /// Load, override and validate `spool.toml`, then assemble
    pub fn load(path: Option<&Path>) -> SpoolResult<Self> {
        Self::from_config(&load_config(path, None)?)
    }

    /// Next batch of `n` rows; shorter only at the end of the device buffer when the
    /// configuration allows partial batches
    pub fn next_batch(&mut self, n: usize) -> SpoolResult<DeviceBatch<'_, CpuBackend>> {
        Ok(self.cache.get(n, self.allow_partial)?)
    }

    pub fn cache(&self) -> &DeviceCache<CpuBackend> {
        &self.cache
    }

    /// `(host, device)` tier counters
    pub fn stats(&self) -> (TierStats, TierStats) {
        (self.cache.host_stats(), self.cache.stats())
    }
}

/// Host and device tiers serving context windows over utterances
pub struct SequencePipeline {
    cache: WindowedDeviceCache<CpuBackend>,
}

impl SequencePipeline {
    pub fn from_config(config: &SpoolConfig) -> SpoolResult<Self> {
        validate_config(config)?;
        let plan = Plan::new(config)?;
        let host = WindowedRowCache::new(SequenceReader::new(plan.sources)?, plan.host)?;
        let options = WindowedDeviceOptions {
            tier: plan.device,
            alignment: config.sequence.alignment,
            allow_partial: config.device.allow_partial_final_batch,
        };
        let cache = WindowedDeviceCache::new(host, plan.backend, options, plan.preprocess)?;
        Ok(Self { cache })
    }

    pub fn load(path: Option<&Path>) -> SpoolResult<Self> {
        Self::from_config(&load_config(path, None)?)
    }

    /// Next batch of up to `batchsize` windows, a multiple of the configured alignment
    pub fn next_batch(
        &mut self,
        batchsize: usize,
    ) -> SpoolResult<WindowedDeviceBatch<'_, CpuBackend>> {
        Ok(self.cache.get(batchsize)?)
    }

    pub fn cache(&self) -> &WindowedDeviceCache<CpuBackend> {
        &self.cache
    }

    pub fn stats(&self) -> (TierStats, TierStats) {
        (self.cache.host_stats(), self.cache.stats())
    }
}
