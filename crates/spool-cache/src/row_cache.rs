// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Row Cache
//!
//! Host-memory tier. Holds up to `capacity` rows per modality in buffers allocated once at
//! construction, refills from the [`BackingStoreReader`] when exhausted and optionally
//! shuffles every modality with one shared permutation.
//!
//! Refills stop at the end of a pass, so a cache load never mixes two epochs.

use ndarray::{s, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace};

use crate::batch::HostBatch;
use crate::error::{CacheError, CacheResult};
use crate::reader::{BackingStoreReader, ReadMode};
use crate::shuffle::shared_permutation;
use crate::stats::TierStats;

/// Sizing and shuffling options shared by the cache tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierOptions {
    /// Rows per modality
    pub capacity_rows: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl TierOptions {
    pub fn new(capacity_rows: usize) -> Self {
        Self {
            capacity_rows,
            shuffle: false,
            seed: 0,
        }
    }

    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }
}

/// Host-memory cache tier
pub struct RowCache {
    reader: BackingStoreReader,
    names: Vec<String>,
    buffers: Vec<Array2<f32>>,
    capacity: usize,
    pos: usize,
    size: usize,
    shuffle: bool,
    rng: StdRng,
    /// The buffer holds the final rows of a pass
    end_of_epoch: bool,
    stats: TierStats,
}

impl RowCache {
    pub fn new(reader: BackingStoreReader, options: TierOptions) -> CacheResult<Self> {
        if options.capacity_rows == 0 {
            return Err(CacheError::Capacity {
                requested: 1,
                available: 0,
            });
        }
        let names: Vec<String> = reader.sources().map(|s| s.name.clone()).collect();
        let buffers: Vec<Array2<f32>> = reader
            .sources()
            .map(|s| Array2::zeros((options.capacity_rows, s.row_width)))
            .collect();
        let stats = TierStats {
            allocations: buffers.len(),
            ..Default::default()
        };

        Ok(Self {
            reader,
            names,
            buffers,
            capacity: options.capacity_rows,
            pos: 0,
            size: 0,
            shuffle: options.shuffle,
            rng: StdRng::seed_from_u64(options.seed),
            end_of_epoch: false,
            stats,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Row width of every modality, in order
    pub fn widths(&self) -> Vec<usize> {
        self.buffers.iter().map(|b| b.ncols()).collect()
    }

    pub fn stats(&self) -> TierStats {
        self.stats
    }

    /// Rows left before the next refill
    pub fn available(&self) -> usize {
        self.size - self.pos
    }

    /// Everything up to the end of the current pass has been handed out
    pub fn at_epoch_end(&self) -> bool {
        self.end_of_epoch && self.pos == self.size
    }

    /// Up to `n` rows per modality; refills first if the buffer is exhausted
    pub fn get(&mut self, n: usize) -> CacheResult<HostBatch<'_>> {
        if self.pos >= self.size {
            self.refill()?;
        }

        let take = n.min(self.size - self.pos);
        let range = self.pos..self.pos + take;
        self.pos += take;
        self.stats.rows_served += take;
        trace!(requested = n, returned = take, "Row cache get");

        Ok(HostBatch {
            modalities: self
                .names
                .iter()
                .zip(&self.buffers)
                .map(|(name, buffer)| (name.as_str(), buffer.slice(s![range.clone(), ..])))
                .collect(),
            end_of_epoch: self.end_of_epoch && self.pos == self.size,
        })
    }

    fn refill(&mut self) -> CacheResult<()> {
        let views = self.buffers.iter_mut().map(|b| b.view_mut()).collect();
        let status = self.reader.fill(views, ReadMode::UpToEpochEnd)?;

        self.size = status.rows;
        self.pos = 0;
        self.end_of_epoch = status.end_of_epoch;
        self.stats.refills += 1;
        if status.end_of_epoch {
            self.stats.epochs += 1;
        }

        if self.shuffle && self.size > 1 {
            let order = shared_permutation(self.size, &mut self.rng);
            for buffer in self.buffers.iter_mut() {
                let shuffled = buffer.slice(s![..self.size, ..]).select(Axis(0), &order);
                buffer.slice_mut(s![..self.size, ..]).assign(&shuffled);
            }
        }

        debug!(
            rows = self.size,
            end_of_epoch = self.end_of_epoch,
            shuffled = self.shuffle,
            "Row cache refilled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::encode_binary_chunk;
    use crate::source::ModalitySource;
    use ndarray::Array;
    use tempfile::tempdir;

    fn cache(rows: usize, capacity: usize, shuffle: bool) -> (tempfile::TempDir, RowCache) {
        let dir = tempdir().unwrap();
        let x = dir.path().join("x.bin");
        let y = dir.path().join("y.bin");
        let data = Array::from_shape_fn((rows, 2), |(r, c)| (r * 2 + c) as f32);
        encode_binary_chunk(&x, &data, None).unwrap();
        encode_binary_chunk(&y, &data.mapv(|v| -v), None).unwrap();

        let reader = BackingStoreReader::new(vec![
            ModalitySource::new("x", 2, vec![x]),
            ModalitySource::new("y", 2, vec![y]),
        ])
        .unwrap();
        let mut options = TierOptions::new(capacity);
        if shuffle {
            options = options.shuffled(42);
        }
        (dir, RowCache::new(reader, options).unwrap())
    }

    #[test]
    fn test_get_clamps_to_buffer() {
        let (_dir, mut cache) = cache(7, 5, false);
        assert_eq!(cache.get(3).unwrap().len(), 3);
        // Two rows remain in this load; no refetch mid-request.
        let short = cache.get(3).unwrap();
        assert_eq!(short.len(), 2);
        assert!(!short.end_of_epoch());

        let tail = cache.get(5).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail.end_of_epoch());
        assert!(cache.at_epoch_end());
        assert_eq!(cache.stats().refills, 2);
        assert_eq!(cache.stats().epochs, 1);
    }

    #[test]
    fn test_shuffle_keeps_modalities_aligned() {
        let (_dir, mut cache) = cache(20, 20, true);
        let batch = cache.get(20).unwrap();
        let x = batch.get("x").unwrap();
        let y = batch.get("y").unwrap();
        assert_eq!(x.mapv(|v| -v), y);

        let first_column: Vec<f32> = x.column(0).to_vec();
        let sorted: Vec<f32> = (0..20).map(|r| (r * 2) as f32).collect();
        assert_ne!(first_column, sorted);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempdir().unwrap();
        let x = dir.path().join("x.bin");
        encode_binary_chunk(&x, &Array2::zeros((1, 1)), None).unwrap();
        let reader = BackingStoreReader::new(vec![ModalitySource::new("x", 1, vec![x])]).unwrap();
        assert!(matches!(
            RowCache::new(reader, TierOptions::new(0)),
            Err(CacheError::Capacity { .. })
        ));
    }
}
