// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Utterance Reader
//!
//! Backing store reader for sequence data. It never splits an utterance: every call returns
//! whole utterances, each padded by repeating its first frame `left` times and its last frame
//! `right` times for its modality's window, together with the padded boundary list.
//!
//! The number of utterances per call is decided on the modality with the largest padding,
//! so every other modality's padded rows also fit the row budget.

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::chunk::DecoderRegistry;
use crate::error::{CacheError, CacheResult};
use crate::reader::check_sources;
use crate::source::ModalitySource;
use crate::window::{BoundaryList, WindowSpec};

/// Whole padded utterances for every modality
#[derive(Debug, Clone)]
pub struct UtteranceBatch {
    /// Padded rows, one array per modality
    pub rows: Vec<Array2<f32>>,
    /// Padded utterance lengths, one list per modality
    pub boundaries: Vec<BoundaryList>,
    /// Unpadded utterance lengths, shared by every modality
    pub lengths: Vec<usize>,
    pub end_of_epoch: bool,
}

struct UtteranceStream {
    source: ModalitySource,
    next_file: usize,
    pending: VecDeque<Array2<f32>>,
    utterances_this_pass: usize,
}

impl UtteranceStream {
    fn new(source: ModalitySource) -> Self {
        Self {
            source,
            next_file: 0,
            pending: VecDeque::new(),
            utterances_this_pass: 0,
        }
    }

    /// Decode files until `want` utterances are pending. Returns `false` if the pass runs out
    /// first.
    fn prime(&mut self, registry: &DecoderRegistry, want: usize) -> CacheResult<bool> {
        while self.pending.len() < want {
            let Some(path) = self.source.files.get(self.next_file) else {
                return Ok(false);
            };
            self.next_file += 1;

            let decoded = registry.decode(path)?;
            let lengths = decoded.utterance_lengths();
            let rows = decoded.chunk.into_dense();
            if rows.ncols() != self.source.row_width {
                return Err(CacheError::Shape(format!(
                    "{} has {} columns, modality '{}' declares {}",
                    path.display(),
                    rows.ncols(),
                    self.source.name,
                    self.source.row_width
                )));
            }

            let mut start = 0;
            for length in lengths {
                self.pending
                    .push_back(rows.slice(s![start..start + length, ..]).to_owned());
                start += length;
            }
        }
        Ok(true)
    }

    fn finish_pass(&mut self) -> CacheResult<()> {
        if self.utterances_this_pass == 0 {
            return Err(CacheError::EmptyDataset(self.source.name.clone()));
        }
        debug!(
            modality = %self.source.name,
            utterances = self.utterances_this_pass,
            "Utterance pass complete"
        );
        self.next_file = 0;
        self.utterances_this_pass = 0;
        Ok(())
    }
}

fn pad_into(mut dst: ArrayViewMut2<'_, f32>, utterance: ArrayView2<'_, f32>, window: WindowSpec) {
    let frames = utterance.nrows();
    let first = utterance.row(0);
    let last = utterance.row(frames - 1);
    for i in 0..window.left {
        dst.row_mut(i).assign(&first);
    }
    dst.slice_mut(s![window.left..window.left + frames, ..])
        .assign(&utterance);
    for i in 0..window.right {
        dst.row_mut(window.left + frames + i).assign(&last);
    }
}

/// Reader yielding whole padded utterances
pub struct SequenceReader {
    streams: Vec<UtteranceStream>,
    registry: DecoderRegistry,
    reference: usize,
    epochs: usize,
}

impl SequenceReader {
    pub fn new(sources: Vec<ModalitySource>) -> CacheResult<Self> {
        Self::with_registry(sources, DecoderRegistry::with_defaults())
    }

    pub fn with_registry(
        sources: Vec<ModalitySource>,
        registry: DecoderRegistry,
    ) -> CacheResult<Self> {
        check_sources(&sources)?;
        let mut reference = 0;
        for (i, source) in sources.iter().enumerate() {
            if source.window.padding() > sources[reference].window.padding() {
                reference = i;
            }
        }
        Ok(Self {
            streams: sources.into_iter().map(UtteranceStream::new).collect(),
            registry,
            reference,
            epochs: 0,
        })
    }

    pub fn sources(&self) -> impl Iterator<Item = &ModalitySource> {
        self.streams.iter().map(|s| &s.source)
    }

    /// Index of the modality with the largest padding
    pub fn reference(&self) -> usize {
        self.reference
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Read as many whole utterances as fit in `max_rows` padded rows (at least one)
    pub fn get(&mut self, max_rows: usize) -> CacheResult<UtteranceBatch> {
        let registry = &self.registry;
        let reference = &mut self.streams[self.reference];
        let padding = reference.source.window.padding();

        if !reference.prime(registry, 1)? {
            reference.finish_pass()?;
            if !reference.prime(registry, 1)? {
                return Err(CacheError::EmptyDataset(reference.source.name.clone()));
            }
        }

        let mut lengths = Vec::new();
        let mut total = 0;
        while reference.prime(registry, lengths.len() + 1)? {
            let frames = reference.pending[lengths.len()].nrows();
            if total + frames + padding > max_rows {
                break;
            }
            total += frames + padding;
            lengths.push(frames);
        }
        if lengths.is_empty() {
            return Err(CacheError::Capacity {
                requested: reference.pending[0].nrows() + padding,
                available: max_rows,
            });
        }
        let count = lengths.len();
        let reference_name = reference.source.name.clone();

        let mut rows = Vec::with_capacity(self.streams.len());
        let mut boundaries = Vec::with_capacity(self.streams.len());
        for stream in self.streams.iter_mut() {
            if !stream.prime(registry, count)? {
                return Err(CacheError::Shape(format!(
                    "modality '{}' ran out of utterances before '{}' ({} of {})",
                    stream.source.name,
                    reference_name,
                    stream.pending.len(),
                    count
                )));
            }
            let window = stream.source.window;
            let padded: Vec<usize> = lengths.iter().map(|l| l + window.padding()).collect();
            let mut out = Array2::zeros((padded.iter().sum(), stream.source.row_width));

            let mut at = 0;
            for (&expected, &span) in lengths.iter().zip(&padded) {
                let Some(utterance) = stream.pending.pop_front() else {
                    break;
                };
                if utterance.nrows() != expected {
                    return Err(CacheError::Shape(format!(
                        "utterance of {} frames in '{}' where '{}' has {}",
                        utterance.nrows(),
                        stream.source.name,
                        reference_name,
                        expected
                    )));
                }
                pad_into(out.slice_mut(s![at..at + span, ..]), utterance.view(), window);
                at += span;
            }
            stream.utterances_this_pass += count;
            rows.push(out);
            boundaries.push(BoundaryList::from_lengths(padded));
        }

        let mut at_end = Vec::with_capacity(self.streams.len());
        for stream in self.streams.iter_mut() {
            at_end.push(!stream.prime(registry, 1)?);
        }
        let end_of_epoch = at_end.iter().all(|&e| e);
        if end_of_epoch {
            for stream in self.streams.iter_mut() {
                stream.finish_pass()?;
            }
            self.epochs += 1;
            info!(epoch = self.epochs, "Utterance epoch complete");
        } else if at_end.iter().any(|&e| e) {
            return Err(CacheError::Shape(
                "modalities disagree on the number of utterances in the dataset".to_string(),
            ));
        }

        Ok(UtteranceBatch {
            rows,
            boundaries,
            lengths,
            end_of_epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::encode_binary_chunk;
    use ndarray::{array, Array};
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn frames(n: usize) -> Array2<f32> {
        Array::from_shape_fn((n, 1), |(r, _)| r as f32)
    }

    fn write(dir: &Path, name: &str, data: &Array2<f32>, segments: &[usize]) -> PathBuf {
        let path = dir.join(name);
        encode_binary_chunk(&path, data, Some(segments)).unwrap();
        path
    }

    #[test]
    fn test_padding_repeats_edge_frames() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.bin", &frames(5), &[3, 2]);
        let mut reader =
            SequenceReader::new(vec![ModalitySource::new("x", 1, vec![a]).with_window(1, 2)])
                .unwrap();

        let batch = reader.get(100).unwrap();
        assert!(batch.end_of_epoch);
        assert_eq!(batch.lengths, vec![3, 2]);
        assert_eq!(batch.boundaries[0].lengths(), &[6, 5]);
        let column: Vec<f32> = batch.rows[0].column(0).to_vec();
        assert_eq!(
            column,
            vec![0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0, 4.0]
        );
    }

    #[test]
    fn test_budget_counts_reference_padding() {
        let dir = tempdir().unwrap();
        let x = write(dir.path(), "x.bin", &frames(9), &[4, 3, 2]);
        let y = write(dir.path(), "y.bin", &frames(9), &[4, 3, 2]);
        let mut reader = SequenceReader::new(vec![
            ModalitySource::new("x", 1, vec![x]),
            ModalitySource::new("y", 1, vec![y]).with_window(1, 1),
        ])
        .unwrap();
        assert_eq!(reader.reference(), 1);

        // (4 + 2) + (3 + 2) = 11 fits, adding (2 + 2) would not.
        let first = reader.get(12).unwrap();
        assert_eq!(first.lengths, vec![4, 3]);
        assert_eq!(first.boundaries[0].total_rows(), 7);
        assert_eq!(first.boundaries[1].total_rows(), 11);
        assert!(!first.end_of_epoch);

        let second = reader.get(12).unwrap();
        assert_eq!(second.lengths, vec![2]);
        assert!(second.end_of_epoch);
    }

    #[test]
    fn test_utterance_too_long_for_budget() {
        let dir = tempdir().unwrap();
        let x = write(dir.path(), "x.bin", &frames(6), &[6]);
        let mut reader = SequenceReader::new(vec![ModalitySource::new("x", 1, vec![x])]).unwrap();
        assert!(matches!(
            reader.get(5),
            Err(CacheError::Capacity {
                requested: 6,
                available: 5
            })
        ));
    }

    #[test]
    fn test_mismatched_grouping_is_shape_error() {
        let dir = tempdir().unwrap();
        let x = write(dir.path(), "x.bin", &frames(4), &[2, 2]);
        let y = write(dir.path(), "y.bin", &frames(4), &[3, 1]);
        let mut reader = SequenceReader::new(vec![
            ModalitySource::new("x", 1, vec![x]),
            ModalitySource::new("y", 1, vec![y]),
        ])
        .unwrap();
        assert!(matches!(reader.get(10), Err(CacheError::Shape(_))));
    }

    #[test]
    fn test_utterance_count_mismatch_is_shape_error() {
        let dir = tempdir().unwrap();
        let x = write(dir.path(), "x.bin", &frames(4), &[2, 2]);
        let y = write(dir.path(), "y.bin", &frames(2), &[2]);
        let mut reader = SequenceReader::new(vec![
            ModalitySource::new("x", 1, vec![x]),
            ModalitySource::new("y", 1, vec![y]),
        ])
        .unwrap();
        assert!(matches!(reader.get(10), Err(CacheError::Shape(_))));
    }

    #[test]
    fn test_wraps_into_next_pass() {
        let dir = tempdir().unwrap();
        let x = write(dir.path(), "x.bin", &array![[1.0], [2.0]], &[1, 1]);
        let mut reader = SequenceReader::new(vec![ModalitySource::new("x", 1, vec![x])]).unwrap();
        assert!(reader.get(10).unwrap().end_of_epoch);
        let again = reader.get(1).unwrap();
        assert_eq!(again.rows[0], array![[1.0]]);
        assert_eq!(reader.epochs(), 1);
    }
}
