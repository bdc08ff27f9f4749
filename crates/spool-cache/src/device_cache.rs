// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Device Cache
//!
//! Device-memory tier on top of a [`RowCache`]. A refill pulls rows from the host tier until
//! the device buffers are full or the pass ends, then runs the per-modality preprocessing
//! in place:
//!
//! 1. normalization with external `(mean, std)` statistics
//! 2. additive Gaussian noise
//! 3. pairwise-swap shuffle, shared by every modality
//! 4. random crop into a separate output buffer
//!
//! Device buffers only ever grow. `get` hands out views into them, which the borrow checker
//! invalidates at the next `get`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spool_device::{DeviceBackend, DeviceBuffer, DeviceView};
use tracing::{debug, trace, warn};

use crate::batch::DeviceBatch;
use crate::error::{CacheError, CacheResult};
use crate::preprocess::Preprocess;
use crate::row_cache::{RowCache, TierOptions};
use crate::shuffle::pairwise_swap_pairs;
use crate::stats::TierStats;

/// Refills allowed inside one `get` before giving up on a dataset smaller than the batch
const MAX_REFILLS_PER_GET: usize = 2;

struct DeviceSlot<B: DeviceBackend> {
    name: String,
    width: usize,
    frames: Option<B::Buffer>,
    cropped: Option<B::Buffer>,
    preprocess: Preprocess,
}

/// Grow `buffer` to at least `needed` columns, keeping its first `keep` columns
pub(crate) fn grow_buffer<B: DeviceBackend>(
    backend: &mut B,
    buffer: &mut Option<B::Buffer>,
    rows: usize,
    needed: usize,
    keep: usize,
    limit: usize,
    stats: &mut TierStats,
) -> CacheResult<()> {
    let current = buffer.as_ref().map_or(0, |b| b.cols());
    if current >= needed {
        return Ok(());
    }

    let cols = needed.max((current * 2).min(limit));
    let mut fresh = backend.allocate(rows, cols)?;
    if let Some(old) = buffer.as_ref() {
        if keep > 0 {
            backend.copy_columns(old, 0..keep, &mut fresh, 0)?;
        }
    }
    *buffer = Some(fresh);
    stats.allocations += 1;
    debug!(rows, from = current, to = cols, "Device buffer grown");
    Ok(())
}

/// Device-memory cache tier
pub struct DeviceCache<B: DeviceBackend> {
    host: RowCache,
    backend: B,
    slots: Vec<DeviceSlot<B>>,
    capacity: usize,
    pos: usize,
    size: usize,
    shuffle: bool,
    rng: StdRng,
    end_of_epoch: bool,
    stats: TierStats,
}

impl<B: DeviceBackend> DeviceCache<B> {
    /// `preprocess` holds one entry per modality, or none for raw data
    pub fn new(
        host: RowCache,
        backend: B,
        options: TierOptions,
        preprocess: Vec<Preprocess>,
    ) -> CacheResult<Self> {
        if options.capacity_rows == 0 {
            return Err(CacheError::Capacity {
                requested: 1,
                available: 0,
            });
        }
        let names = host.names().to_vec();
        let widths = host.widths();
        let preprocess = if preprocess.is_empty() {
            vec![Preprocess::default(); names.len()]
        } else {
            preprocess
        };
        if preprocess.len() != names.len() {
            return Err(CacheError::Shape(format!(
                "{} preprocessing entries for {} modalities",
                preprocess.len(),
                names.len()
            )));
        }

        let mut slots = Vec::with_capacity(names.len());
        for ((name, width), preprocess) in names.into_iter().zip(widths).zip(preprocess) {
            preprocess.check(&name, width)?;
            slots.push(DeviceSlot {
                name,
                width,
                frames: None,
                cropped: None,
                preprocess,
            });
        }
        debug!(
            backend = backend.backend_name(),
            capacity = options.capacity_rows,
            "Device cache created"
        );

        Ok(Self {
            host,
            backend,
            slots,
            capacity: options.capacity_rows,
            pos: 0,
            size: 0,
            shuffle: options.shuffle,
            rng: StdRng::seed_from_u64(options.seed),
            end_of_epoch: false,
            stats: TierStats::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stats(&self) -> TierStats {
        self.stats
    }

    pub fn host_stats(&self) -> TierStats {
        self.host.stats()
    }

    /// Features per sample returned for each modality (after cropping)
    pub fn output_widths(&self) -> Vec<(String, usize)> {
        self.slots
            .iter()
            .map(|s| {
                let width = s.preprocess.output_width(s.width).unwrap_or(s.width);
                (s.name.clone(), width)
            })
            .collect()
    }

    /// Next `n` samples of every modality.
    ///
    /// When fewer than `n` samples remain in the buffer the remainder is returned if
    /// `allow_partial`, otherwise it is dropped and the batch comes from a fresh refill.
    pub fn get(&mut self, n: usize, allow_partial: bool) -> CacheResult<DeviceBatch<'_, B>> {
        if n > self.capacity {
            return Err(CacheError::Capacity {
                requested: n,
                available: self.capacity,
            });
        }

        let mut refills = 0;
        let take = loop {
            if self.pos >= self.size {
                if refills == MAX_REFILLS_PER_GET {
                    return Err(CacheError::Capacity {
                        requested: n,
                        available: self.size,
                    });
                }
                self.refill()?;
                refills += 1;
                continue;
            }

            let available = self.size - self.pos;
            if available >= n {
                break n;
            }
            if allow_partial {
                break available;
            }
            warn!(
                dropped = available,
                requested = n,
                "Dropping partial batch at end of device buffer"
            );
            self.stats.rows_dropped += available;
            self.pos = self.size;
        };

        let cols = self.pos..self.pos + take;
        self.pos += take;
        self.stats.rows_served += take;
        trace!(requested = n, returned = take, "Device cache get");

        let end_of_epoch = self.end_of_epoch && self.pos == self.size;
        let this = &*self;
        let mut modalities = Vec::with_capacity(this.slots.len());
        for slot in &this.slots {
            let buffer = if slot.preprocess.shift.is_some() {
                slot.cropped.as_ref()
            } else {
                slot.frames.as_ref()
            };
            let Some(buffer) = buffer else {
                return Err(CacheError::Capacity {
                    requested: n,
                    available: 0,
                });
            };
            modalities.push((
                slot.name.as_str(),
                DeviceView::new(&this.backend, buffer, cols.clone()),
            ));
        }

        Ok(DeviceBatch {
            modalities,
            end_of_epoch,
        })
    }

    fn refill(&mut self) -> CacheResult<()> {
        let Self {
            host,
            backend,
            slots,
            capacity,
            shuffle,
            rng,
            stats,
            ..
        } = self;
        let capacity = *capacity;

        let mut filled = 0;
        let mut end_of_epoch = false;
        while filled < capacity {
            let batch = host.get(capacity - filled)?;
            let got = batch.len();
            for (slot, (_, rows)) in slots.iter_mut().zip(batch.iter()) {
                grow_buffer(
                    backend,
                    &mut slot.frames,
                    slot.width,
                    filled + got,
                    filled,
                    capacity,
                    stats,
                )?;
                if let Some(frames) = slot.frames.as_mut() {
                    backend.upload_rows(frames, filled, rows)?;
                }
            }
            filled += got;
            if batch.end_of_epoch() {
                end_of_epoch = true;
                break;
            }
            if got == 0 {
                break;
            }
        }

        for slot in slots.iter_mut() {
            let Some(frames) = slot.frames.as_mut() else {
                continue;
            };
            if let Some(norm) = &slot.preprocess.normalize {
                backend.normalize(frames, 0..filled, norm.mean(), norm.inv_std())?;
            }
            if let Some(std) = slot.preprocess.noise_std {
                let seed: u64 = rng.gen();
                backend.add_gaussian_noise(frames, 0..filled, std, seed)?;
            }
        }

        if *shuffle && filled > 1 {
            let pairs = pairwise_swap_pairs(filled, rng);
            for slot in slots.iter_mut() {
                if let Some(frames) = slot.frames.as_mut() {
                    backend.swap_columns(frames, &pairs)?;
                }
            }
        }

        for slot in slots.iter_mut() {
            let Some(shift) = slot.preprocess.shift else {
                continue;
            };
            let out_geometry = shift.output_geometry()?;
            grow_buffer(
                backend,
                &mut slot.cropped,
                out_geometry.len(),
                filled,
                0,
                capacity,
                stats,
            )?;
            let offsets = shift.offsets(filled, rng);
            if let (Some(frames), Some(cropped)) = (slot.frames.as_ref(), slot.cropped.as_mut()) {
                backend.crop_images(frames, shift.image, cropped, out_geometry, &offsets)?;
            }
        }

        stats.refills += 1;
        if end_of_epoch {
            stats.epochs += 1;
        }
        debug!(rows = filled, end_of_epoch, "Device cache refilled");

        self.size = filled;
        self.pos = 0;
        self.end_of_epoch = end_of_epoch;
        Ok(())
    }
}
