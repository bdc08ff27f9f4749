// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Windowed Row Cache
//!
//! Host tier for sequence data. Each refill loads whole padded utterances from the
//! [`SequenceReader`]; optionally the utterance order is shuffled with one permutation
//! shared by every modality (frames inside an utterance never move).
//!
//! `get` serves valid window centers in two passes. The sizing pass runs on the modality
//! with the largest padding and fixes the number of centers; the materialization pass then
//! advances every modality's own cursor by exactly that many centers.

use ndarray::{s, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace, warn};

use crate::batch::{WindowedHostBatch, WindowedRows};
use crate::error::{CacheError, CacheResult};
use crate::row_cache::TierOptions;
use crate::sequence::SequenceReader;
use crate::shuffle::shared_permutation;
use crate::stats::TierStats;
use crate::window::{count_centers, take_centers, BoundaryList, UtteranceCursor, WindowSpec};

const MAX_REFILLS_PER_GET: usize = 2;

struct WindowedSlot {
    name: String,
    window: WindowSpec,
    buffer: Array2<f32>,
    boundaries: BoundaryList,
    cursor: UtteranceCursor,
}

/// Whole padded utterances of one modality
#[derive(Debug)]
pub struct UtteranceRows<'a> {
    pub name: &'a str,
    pub window: WindowSpec,
    pub rows: ArrayView2<'a, f32>,
    /// Padded lengths of the utterances in `rows`
    pub boundaries: BoundaryList,
}

/// Result of [`WindowedRowCache::take_utterances`]
#[derive(Debug)]
pub struct UtteranceBlock<'a> {
    pub modalities: Vec<UtteranceRows<'a>>,
    pub end_of_epoch: bool,
}

/// Host tier serving context windows that never cross an utterance boundary
pub struct WindowedRowCache {
    reader: SequenceReader,
    slots: Vec<WindowedSlot>,
    reference: usize,
    capacity: usize,
    shuffle: bool,
    rng: StdRng,
    end_of_epoch: bool,
    stats: TierStats,
}

impl WindowedRowCache {
    pub fn new(reader: SequenceReader, options: TierOptions) -> CacheResult<Self> {
        if options.capacity_rows == 0 {
            return Err(CacheError::Capacity {
                requested: 1,
                available: 0,
            });
        }
        let slots: Vec<WindowedSlot> = reader
            .sources()
            .map(|source| WindowedSlot {
                name: source.name.clone(),
                window: source.window,
                buffer: Array2::zeros((options.capacity_rows, source.row_width)),
                boundaries: BoundaryList::default(),
                cursor: UtteranceCursor::default(),
            })
            .collect();
        let stats = TierStats {
            allocations: slots.len(),
            ..Default::default()
        };

        Ok(Self {
            reference: reader.reference(),
            reader,
            slots,
            capacity: options.capacity_rows,
            shuffle: options.shuffle,
            rng: StdRng::seed_from_u64(options.seed),
            end_of_epoch: false,
            stats,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> TierStats {
        self.stats
    }

    /// Modality names, widths and windows, in order
    pub fn layout(&self) -> Vec<(String, usize, WindowSpec)> {
        self.slots
            .iter()
            .map(|s| (s.name.clone(), s.buffer.ncols(), s.window))
            .collect()
    }

    /// Index of the modality driving the sizing pass
    pub fn reference(&self) -> usize {
        self.reference
    }

    fn remaining(&self) -> usize {
        let slot = &self.slots[self.reference];
        count_centers(&slot.boundaries, &slot.cursor, slot.window, usize::MAX)
    }

    /// Up to `batchsize` valid centers, rounded down to a multiple of `alignment`
    pub fn get(&mut self, batchsize: usize, alignment: usize) -> CacheResult<WindowedHostBatch<'_>> {
        let alignment = alignment.max(1);
        if batchsize < alignment {
            return Err(CacheError::Capacity {
                requested: alignment,
                available: batchsize,
            });
        }

        let mut refills = 0;
        let n = loop {
            let remaining = self.remaining();
            let n = remaining.min(batchsize);
            let n = n - n % alignment;
            if n > 0 {
                break n;
            }
            if remaining > 0 {
                warn!(
                    dropped = remaining,
                    alignment, "Dropping window centers that cannot fill an aligned batch"
                );
                self.stats.rows_dropped += remaining;
            }
            if refills == MAX_REFILLS_PER_GET {
                return Err(CacheError::Capacity {
                    requested: alignment,
                    available: remaining,
                });
            }
            self.refill()?;
            refills += 1;
        };

        let mut takes = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter_mut() {
            takes.push(take_centers(&slot.boundaries, &mut slot.cursor, slot.window, n)?);
        }
        self.stats.rows_served += n;
        trace!(requested = batchsize, returned = n, "Windowed row cache get");

        let end_of_epoch = self.end_of_epoch && self.remaining() == 0;
        let modalities = self
            .slots
            .iter()
            .zip(takes)
            .map(|(slot, take)| WindowedRows {
                name: slot.name.as_str(),
                window: slot.window,
                rows: slot.buffer.slice(s![take.rows.clone(), ..]),
                centers: take.centers,
            })
            .collect();

        Ok(WindowedHostBatch {
            modalities,
            end_of_epoch,
        })
    }

    /// Whole utterances from the current position, at most `max_rows` padded rows of the
    /// reference modality (at least one utterance).
    pub fn take_utterances(&mut self, max_rows: usize) -> CacheResult<UtteranceBlock<'_>> {
        self.align_to_utterance()?;

        let reference = &self.slots[self.reference];
        let first = reference.cursor.utt;
        let available = reference.boundaries.len();
        let mut count = 0;
        let mut total = 0;
        while first + count < available {
            let length = reference.boundaries.length(first + count);
            if total + length > max_rows {
                break;
            }
            total += length;
            count += 1;
        }
        if count == 0 {
            return Err(CacheError::Capacity {
                requested: reference.boundaries.length(first),
                available: max_rows,
            });
        }
        let centers: usize = (first..first + count)
            .map(|u| reference.boundaries.valid_centers(u, reference.window))
            .sum();

        let mut ranges = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter_mut() {
            let start = slot.boundaries.start(first);
            let last = first + count - 1;
            let end = slot.boundaries.start(last) + slot.boundaries.length(last);
            let lengths = slot.boundaries.lengths()[first..first + count].to_vec();
            slot.cursor = UtteranceCursor {
                abs: end,
                in_utt: 0,
                utt: first + count,
            };
            ranges.push((start..end, BoundaryList::from_lengths(lengths)));
        }
        self.stats.rows_served += centers;

        let end_of_epoch = self.end_of_epoch && first + count == available;
        let modalities = self
            .slots
            .iter()
            .zip(ranges)
            .map(|(slot, (range, boundaries))| UtteranceRows {
                name: slot.name.as_str(),
                window: slot.window,
                rows: slot.buffer.slice(s![range, ..]),
                boundaries,
            })
            .collect();

        Ok(UtteranceBlock {
            modalities,
            end_of_epoch,
        })
    }

    /// Padded rows of the reference modality's next whole utterance. Refills the buffer
    /// when it is spent, so the answer always describes what `take_utterances` hands out
    /// next.
    pub fn next_utterance_rows(&mut self) -> CacheResult<usize> {
        self.align_to_utterance()?;
        let reference = &self.slots[self.reference];
        Ok(reference.boundaries.length(reference.cursor.utt))
    }

    /// Skip the rest of a partly served utterance; refill once the buffer is spent.
    fn align_to_utterance(&mut self) -> CacheResult<()> {
        for slot in self.slots.iter_mut() {
            if slot.cursor.in_utt > 0 {
                slot.cursor.utt += 1;
                slot.cursor.in_utt = 0;
            }
        }
        if self.slots[self.reference].cursor.utt >= self.slots[self.reference].boundaries.len() {
            self.refill()?;
        }
        Ok(())
    }

    fn refill(&mut self) -> CacheResult<()> {
        let batch = self.reader.get(self.capacity)?;
        let count = batch.lengths.len();
        if batch.boundaries.iter().any(|b| b.len() != count) {
            return Err(CacheError::Shape(
                "boundary lists disagree on utterance count".to_string(),
            ));
        }

        let order = if self.shuffle && count > 1 {
            Some(shared_permutation(count, &mut self.rng))
        } else {
            None
        };

        for (slot, (rows, boundaries)) in self
            .slots
            .iter_mut()
            .zip(batch.rows.into_iter().zip(batch.boundaries))
        {
            match &order {
                Some(order) => {
                    let mut at = 0;
                    for &utt in order {
                        let start = boundaries.start(utt);
                        let length = boundaries.length(utt);
                        slot.buffer
                            .slice_mut(s![at..at + length, ..])
                            .assign(&rows.slice(s![start..start + length, ..]));
                        at += length;
                    }
                    slot.boundaries = boundaries.reordered(order);
                }
                None => {
                    slot.buffer
                        .slice_mut(s![..rows.nrows(), ..])
                        .assign(&rows);
                    slot.boundaries = boundaries;
                }
            }
            slot.cursor = UtteranceCursor::default();
        }

        let reference = &self.slots[self.reference];
        let empty = (0..reference.boundaries.len())
            .filter(|&u| reference.boundaries.valid_centers(u, reference.window) == 0)
            .count();
        if empty > 0 {
            warn!(utterances = empty, "Utterances too short for any full context window");
        }

        self.end_of_epoch = batch.end_of_epoch;
        self.stats.refills += 1;
        if batch.end_of_epoch {
            self.stats.epochs += 1;
        }
        debug!(
            utterances = count,
            rows = reference.boundaries.total_rows(),
            end_of_epoch = batch.end_of_epoch,
            "Windowed row cache refilled"
        );
        Ok(())
    }
}
