// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Windowed Device Cache
//!
//! Device tier for sequence data. A refill copies whole padded utterances from the
//! [`WindowedRowCache`] into a per-modality frame buffer. Every `get` builds a
//! `(window, batch)` index matrix by broadcasting the offset template `-left..=right`
//! against the batch's center columns and assembles the `(window * width, batch)` block
//! with a single device gather.

use ndarray::{concatenate, s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spool_device::{DeviceBackend, DeviceView};
use tracing::{debug, trace, warn};

use crate::batch::{WindowBlock, WindowedDeviceBatch};
use crate::device_cache::grow_buffer;
use crate::error::{CacheError, CacheResult};
use crate::preprocess::Preprocess;
use crate::row_cache::TierOptions;
use crate::shuffle::{order_after_swaps, pairwise_swap_pairs};
use crate::stats::TierStats;
use crate::window::{count_centers, take_centers, BoundaryList, UtteranceCursor, WindowSpec};
use crate::windowed_row_cache::WindowedRowCache;

const MAX_REFILLS_PER_GET: usize = 2;

/// Options for [`WindowedDeviceCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowedDeviceOptions {
    pub tier: TierOptions,
    /// Batches hold a multiple of this many centers
    pub alignment: usize,
    /// Return short batches at the end of the buffer instead of dropping them
    pub allow_partial: bool,
}

impl WindowedDeviceOptions {
    pub fn new(tier: TierOptions) -> Self {
        Self {
            tier,
            alignment: 1,
            allow_partial: false,
        }
    }
}

struct WindowedDeviceSlot<B: DeviceBackend> {
    name: String,
    width: usize,
    window: WindowSpec,
    frames: Option<B::Buffer>,
    block: Option<B::Buffer>,
    boundaries: BoundaryList,
    cursor: UtteranceCursor,
    preprocess: Preprocess,
}

/// Device tier serving gathered context windows
pub struct WindowedDeviceCache<B: DeviceBackend> {
    host: WindowedRowCache,
    backend: B,
    slots: Vec<WindowedDeviceSlot<B>>,
    reference: usize,
    capacity: usize,
    alignment: usize,
    allow_partial: bool,
    shuffle: bool,
    rng: StdRng,
    end_of_epoch: bool,
    stats: TierStats,
}

impl<B: DeviceBackend> WindowedDeviceCache<B> {
    pub fn new(
        host: WindowedRowCache,
        backend: B,
        options: WindowedDeviceOptions,
        preprocess: Vec<Preprocess>,
    ) -> CacheResult<Self> {
        if options.tier.capacity_rows == 0 {
            return Err(CacheError::Capacity {
                requested: 1,
                available: 0,
            });
        }
        let layout = host.layout();
        let preprocess = if preprocess.is_empty() {
            vec![Preprocess::default(); layout.len()]
        } else {
            preprocess
        };
        if preprocess.len() != layout.len() {
            return Err(CacheError::Shape(format!(
                "{} preprocessing entries for {} modalities",
                preprocess.len(),
                layout.len()
            )));
        }

        let mut slots = Vec::with_capacity(layout.len());
        for ((name, width, window), preprocess) in layout.into_iter().zip(preprocess) {
            preprocess.check(&name, width)?;
            if preprocess.shift.is_some() {
                return Err(CacheError::Shape(format!(
                    "modality '{}': shift augmentation is not available for windowed data",
                    name
                )));
            }
            slots.push(WindowedDeviceSlot {
                name,
                width,
                window,
                frames: None,
                block: None,
                boundaries: BoundaryList::default(),
                cursor: UtteranceCursor::default(),
                preprocess,
            });
        }

        Ok(Self {
            reference: host.reference(),
            host,
            backend,
            slots,
            capacity: options.tier.capacity_rows,
            alignment: options.alignment.max(1),
            allow_partial: options.allow_partial,
            shuffle: options.tier.shuffle,
            rng: StdRng::seed_from_u64(options.tier.seed),
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

    /// Rows of each modality's window block: `window * width`
    pub fn block_heights(&self) -> Vec<(String, usize)> {
        self.slots
            .iter()
            .map(|s| (s.name.clone(), s.window.size() * s.width))
            .collect()
    }

    fn remaining(&self) -> usize {
        let slot = &self.slots[self.reference];
        count_centers(&slot.boundaries, &slot.cursor, slot.window, usize::MAX)
    }

    /// Next `batchsize` windows of every modality
    pub fn get(&mut self, batchsize: usize) -> CacheResult<WindowedDeviceBatch<'_, B>> {
        if batchsize > self.capacity || batchsize < self.alignment {
            return Err(CacheError::Capacity {
                requested: batchsize,
                available: self.capacity,
            });
        }
        let target = batchsize - batchsize % self.alignment;

        let mut refills = 0;
        let n = loop {
            let remaining = self.remaining();
            if remaining >= target {
                break target;
            }
            let aligned = remaining - remaining % self.alignment;
            if self.allow_partial && aligned > 0 {
                break aligned;
            }
            if remaining > 0 {
                warn!(
                    dropped = remaining,
                    requested = batchsize,
                    "Dropping partial window batch at end of device buffer"
                );
                self.stats.rows_dropped += remaining;
            }
            if refills == MAX_REFILLS_PER_GET {
                return Err(CacheError::Capacity {
                    requested: batchsize,
                    available: remaining,
                });
            }
            self.refill()?;
            refills += 1;
        };

        let Self {
            backend,
            slots,
            capacity,
            stats,
            ..
        } = self;
        let mut centers = Vec::with_capacity(slots.len());
        for slot in slots.iter_mut() {
            let take = take_centers(&slot.boundaries, &mut slot.cursor, slot.window, n)?;
            let absolute: Array1<isize> = take.absolute_centers().map(|c| c as isize).collect();
            let offsets = slot.window.offsets().insert_axis(Axis(1));
            let index: Array2<usize> =
                (&offsets + &absolute.insert_axis(Axis(0))).mapv(|i| i as usize);

            grow_buffer(
                backend,
                &mut slot.block,
                slot.window.size() * slot.width,
                n,
                0,
                *capacity,
                stats,
            )?;
            if let (Some(frames), Some(block)) = (slot.frames.as_ref(), slot.block.as_mut()) {
                backend.gather_columns(frames, index.view(), block)?;
            }
            centers.push(take.absolute_centers().collect::<Vec<_>>());
        }
        self.stats.rows_served += n;
        trace!(requested = batchsize, returned = n, "Windowed device cache get");

        let end_of_epoch = self.end_of_epoch && self.remaining() == 0;
        let this = &*self;
        let mut blocks = Vec::with_capacity(this.slots.len());
        for (slot, centers) in this.slots.iter().zip(centers) {
            let Some(block) = slot.block.as_ref() else {
                return Err(CacheError::Capacity {
                    requested: n,
                    available: 0,
                });
            };
            blocks.push(WindowBlock {
                name: slot.name.as_str(),
                window: slot.window,
                view: DeviceView::new(&this.backend, block, 0..n),
                centers,
            });
        }

        Ok(WindowedDeviceBatch {
            blocks,
            end_of_epoch,
        })
    }

    /// Copy whole utterances from the host tier until the device buffer is full or the
    /// epoch ends. Host loads are crossed freely; only the epoch end leaves a short buffer.
    fn refill(&mut self) -> CacheResult<()> {
        let Self {
            host,
            backend,
            slots,
            reference,
            capacity,
            shuffle,
            rng,
            stats,
            ..
        } = self;
        let capacity = *capacity;

        let mut staged: Vec<Vec<Array2<f32>>> = vec![Vec::new(); slots.len()];
        let mut lengths: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];
        let mut used = 0;
        let end_of_epoch = loop {
            let block = host.take_utterances(capacity - used)?;
            for (i, utt) in block.modalities.iter().enumerate() {
                staged[i].push(utt.rows.to_owned());
                lengths[i].extend_from_slice(utt.boundaries.lengths());
            }
            used += block.modalities[*reference].rows.nrows();
            if block.end_of_epoch {
                break true;
            }
            if used + host.next_utterance_rows()? > capacity {
                break false;
            }
        };

        let count = lengths.first().map_or(0, Vec::len);
        let order = if *shuffle && count > 1 {
            let pairs = pairwise_swap_pairs(count, rng);
            Some(order_after_swaps(count, &pairs))
        } else {
            None
        };

        for ((slot, pieces), lengths) in slots.iter_mut().zip(staged).zip(lengths) {
            let views: Vec<_> = pieces.iter().map(|p| p.view()).collect();
            let rows = concatenate(Axis(0), &views)
                .map_err(|e| CacheError::Shape(format!("modality '{}': {}", slot.name, e)))?;
            let boundaries = BoundaryList::from_lengths(lengths);
            let n_rows = rows.nrows();
            grow_buffer(backend, &mut slot.frames, slot.width, n_rows, 0, capacity, stats)?;
            let Some(frames) = slot.frames.as_mut() else {
                continue;
            };

            match &order {
                Some(order) => {
                    let mut at = 0;
                    for &u in order {
                        let start = boundaries.start(u);
                        let length = boundaries.length(u);
                        backend.upload_rows(frames, at, rows.slice(s![start..start + length, ..]))?;
                        at += length;
                    }
                    slot.boundaries = boundaries.reordered(order);
                }
                None => {
                    backend.upload_rows(frames, 0, rows.view())?;
                    slot.boundaries = boundaries;
                }
            }
            slot.cursor = UtteranceCursor::default();

            if let Some(norm) = &slot.preprocess.normalize {
                backend.normalize(frames, 0..n_rows, norm.mean(), norm.inv_std())?;
            }
            if let Some(std) = slot.preprocess.noise_std {
                let seed: u64 = rng.gen();
                backend.add_gaussian_noise(frames, 0..n_rows, std, seed)?;
            }
        }

        stats.refills += 1;
        if end_of_epoch {
            stats.epochs += 1;
        }
        debug!(
            utterances = count,
            rows = used,
            end_of_epoch,
            "Windowed device cache refilled"
        );
        self.end_of_epoch = end_of_epoch;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::encode_binary_chunk;
    use crate::sequence::SequenceReader;
    use crate::source::ModalitySource;
    use ndarray::Array;
    use spool_device::CpuBackend;
    use tempfile::tempdir;

    fn cache(
        lengths: &[usize],
        window: (usize, usize),
        options: impl Fn(TierOptions) -> WindowedDeviceOptions,
    ) -> (tempfile::TempDir, WindowedDeviceCache<CpuBackend>) {
        let dir = tempdir().unwrap();
        let x = dir.path().join("x.bin");
        let total = lengths.iter().sum();
        let data = Array::from_shape_fn((total, 2), |(r, c)| (r * 10 + c) as f32);
        encode_binary_chunk(&x, &data, Some(lengths)).unwrap();
        let reader = SequenceReader::new(vec![
            ModalitySource::new("x", 2, vec![x]).with_window(window.0, window.1)
        ])
        .unwrap();
        let host = WindowedRowCache::new(reader, TierOptions::new(64)).unwrap();
        let cache =
            WindowedDeviceCache::new(host, CpuBackend::new(), options(TierOptions::new(64)), vec![])
                .unwrap();
        (dir, cache)
    }

    #[test]
    fn test_block_stacks_neighbouring_frames() {
        let (_dir, mut cache) = cache(&[3, 5], (1, 1), WindowedDeviceOptions::new);
        let batch = cache.get(4).unwrap();
        let rows = batch.get("x").unwrap().view.to_rows().unwrap();
        assert_eq!(rows.dim(), (4, 6));
        // First center of utterance 0 repeats its first frame on the left.
        assert_eq!(rows.row(0).to_vec(), vec![0.0, 1.0, 0.0, 1.0, 10.0, 11.0]);
        // First center of utterance 1 (dataset frame 3).
        assert_eq!(rows.row(3).to_vec(), vec![30.0, 31.0, 30.0, 31.0, 40.0, 41.0]);
    }

    #[test]
    fn test_partial_windows_follow_allow_partial() {
        let (_dir, mut strict) = cache(&[3, 2], (0, 0), WindowedDeviceOptions::new);
        assert_eq!(strict.get(4).unwrap().len(), 4);
        // One center left: dropped, then a fresh pass.
        assert_eq!(strict.get(4).unwrap().len(), 4);
        assert_eq!(strict.stats().rows_dropped, 1);

        let (_dir, mut lenient) = cache(&[3, 2], (0, 0), |tier| WindowedDeviceOptions {
            allow_partial: true,
            ..WindowedDeviceOptions::new(tier)
        });
        assert_eq!(lenient.get(4).unwrap().len(), 4);
        let tail = lenient.get(4).unwrap();
        assert_eq!(tail.len(), 1);
        assert!(tail.end_of_epoch());
    }

    #[test]
    fn test_block_buffer_grows_only() {
        let (_dir, mut cache) = cache(&[20], (1, 1), WindowedDeviceOptions::new);
        cache.get(8).unwrap();
        let after_first = cache.stats().allocations;
        cache.get(8).unwrap();
        cache.get(4).unwrap();
        assert_eq!(cache.stats().allocations, after_first);
    }
}
