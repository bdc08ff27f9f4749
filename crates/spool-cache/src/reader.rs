// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Backing Store Reader
//!
//! Sequential chunked reader over the files of every modality. Each modality keeps its own
//! file cursor and the unconsumed tail of its last decoded chunk, so a request for `n` rows
//! is served exactly regardless of how rows are split across files.
//!
//! Files are visited round-robin. Reaching the end of a modality's file list ends a pass
//! (an epoch); the end is detected eagerly, so the call that consumes the final row of a
//! pass already reports `end_of_epoch`.

use ndarray::{s, Array2, ArrayViewMut2};
use tracing::{debug, info};

use crate::chunk::DecoderRegistry;
use crate::error::{CacheError, CacheResult};
use crate::source::ModalitySource;

/// How a read treats the end of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Wrap into the next pass; always return the requested row count
    Exact,
    /// Stop at the end of the pass; the returned piece may be short
    UpToEpochEnd,
}

/// Rows written by a fill, identical for every modality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStatus {
    pub rows: usize,
    /// A pass ended during this read
    pub end_of_epoch: bool,
}

/// Owned rows returned by [`BackingStoreReader::get`], one array per modality
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub rows: Vec<Array2<f32>>,
    pub end_of_epoch: bool,
}

struct Leftover {
    rows: Array2<f32>,
    offset: usize,
}

impl Leftover {
    fn remaining(&self) -> usize {
        self.rows.nrows() - self.offset
    }
}

struct RowStream {
    source: ModalitySource,
    next_file: usize,
    leftover: Option<Leftover>,
    rows_this_pass: usize,
    passes: usize,
}

impl RowStream {
    fn new(source: ModalitySource) -> Self {
        Self {
            source,
            next_file: 0,
            leftover: None,
            rows_this_pass: 0,
            passes: 0,
        }
    }

    /// Decode files until unconsumed rows exist. Returns `false` at the end of the pass.
    fn prime(&mut self, registry: &DecoderRegistry) -> CacheResult<bool> {
        loop {
            if let Some(leftover) = &self.leftover {
                if leftover.remaining() > 0 {
                    return Ok(true);
                }
            }
            self.leftover = None;

            let Some(path) = self.source.files.get(self.next_file) else {
                return Ok(false);
            };
            self.next_file += 1;

            let rows = registry.decode(path)?.chunk.into_dense();
            if rows.ncols() != self.source.row_width {
                return Err(CacheError::Shape(format!(
                    "{} has {} columns, modality '{}' declares {}",
                    path.display(),
                    rows.ncols(),
                    self.source.name,
                    self.source.row_width
                )));
            }
            self.rows_this_pass += rows.nrows();
            self.leftover = Some(Leftover { rows, offset: 0 });
        }
    }

    fn finish_pass(&mut self) -> CacheResult<()> {
        if self.rows_this_pass == 0 {
            return Err(CacheError::EmptyDataset(self.source.name.clone()));
        }
        self.passes += 1;
        debug!(
            modality = %self.source.name,
            rows = self.rows_this_pass,
            pass = self.passes,
            "Backing store pass complete"
        );
        self.next_file = 0;
        self.rows_this_pass = 0;
        Ok(())
    }

    fn fill(
        &mut self,
        mut dst: ArrayViewMut2<'_, f32>,
        mode: ReadMode,
        registry: &DecoderRegistry,
    ) -> CacheResult<ReadStatus> {
        let n = dst.nrows();
        let mut filled = 0;
        let mut end_of_epoch = false;

        while filled < n {
            if !self.prime(registry)? {
                self.finish_pass()?;
                end_of_epoch = true;
                if mode == ReadMode::UpToEpochEnd {
                    break;
                }
                continue;
            }
            if let Some(leftover) = self.leftover.as_mut() {
                let take = (n - filled).min(leftover.remaining());
                dst.slice_mut(s![filled..filled + take, ..]).assign(
                    &leftover
                        .rows
                        .slice(s![leftover.offset..leftover.offset + take, ..]),
                );
                leftover.offset += take;
                filled += take;
            }
        }

        if !end_of_epoch && !self.prime(registry)? {
            self.finish_pass()?;
            end_of_epoch = true;
        }

        Ok(ReadStatus {
            rows: filled,
            end_of_epoch,
        })
    }
}

/// Reader over every modality's backing files
pub struct BackingStoreReader {
    streams: Vec<RowStream>,
    registry: DecoderRegistry,
    epochs: usize,
}

impl BackingStoreReader {
    /// Reader using the built-in decoders
    pub fn new(sources: Vec<ModalitySource>) -> CacheResult<Self> {
        Self::with_registry(sources, DecoderRegistry::with_defaults())
    }

    pub fn with_registry(
        sources: Vec<ModalitySource>,
        registry: DecoderRegistry,
    ) -> CacheResult<Self> {
        check_sources(&sources)?;
        Ok(Self {
            streams: sources.into_iter().map(RowStream::new).collect(),
            registry,
            epochs: 0,
        })
    }

    pub fn sources(&self) -> impl Iterator<Item = &ModalitySource> {
        self.streams.iter().map(|s| &s.source)
    }

    pub fn num_modalities(&self) -> usize {
        self.streams.len()
    }

    /// Completed passes over the backing store
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Read up to `n` rows per modality into owned arrays
    pub fn get(&mut self, n: usize, mode: ReadMode) -> CacheResult<ReadOutcome> {
        let mut rows: Vec<Array2<f32>> = self
            .streams
            .iter()
            .map(|s| Array2::zeros((n, s.source.row_width)))
            .collect();
        let status = self.fill(rows.iter_mut().map(|r| r.view_mut()).collect(), mode)?;
        if status.rows < n {
            for r in rows.iter_mut() {
                r.slice_collapse(s![..status.rows, ..]);
            }
        }
        Ok(ReadOutcome {
            rows,
            end_of_epoch: status.end_of_epoch,
        })
    }

    /// Read into caller-provided buffers, one per modality, all with the same row count
    pub fn fill(
        &mut self,
        dst: Vec<ArrayViewMut2<'_, f32>>,
        mode: ReadMode,
    ) -> CacheResult<ReadStatus> {
        if dst.len() != self.streams.len() {
            return Err(CacheError::Shape(format!(
                "{} destination buffers for {} modalities",
                dst.len(),
                self.streams.len()
            )));
        }

        let mut outcome: Option<(ReadStatus, &str)> = None;
        for (stream, view) in self.streams.iter_mut().zip(dst) {
            if view.ncols() != stream.source.row_width {
                return Err(CacheError::Shape(format!(
                    "destination of width {} for modality '{}' of width {}",
                    view.ncols(),
                    stream.source.name,
                    stream.source.row_width
                )));
            }
            let status = stream.fill(view, mode, &self.registry)?;
            match &outcome {
                None => outcome = Some((status, stream.source.name.as_str())),
                Some((first, first_name)) if *first != status => {
                    return Err(CacheError::Shape(format!(
                        "modality '{}' read {} rows (end of epoch: {}) but '{}' read {} (end of epoch: {})",
                        stream.source.name,
                        status.rows,
                        status.end_of_epoch,
                        first_name,
                        first.rows,
                        first.end_of_epoch
                    )));
                }
                Some(_) => {}
            }
        }

        let status = outcome.map(|(s, _)| s).unwrap_or(ReadStatus {
            rows: 0,
            end_of_epoch: false,
        });
        if status.end_of_epoch {
            self.epochs += 1;
            info!(epoch = self.epochs, "Backing store epoch complete");
        }
        Ok(status)
    }
}

pub(crate) fn check_sources(sources: &[ModalitySource]) -> CacheResult<()> {
    if sources.is_empty() {
        return Err(CacheError::Shape("no modalities configured".to_string()));
    }
    for source in sources {
        if source.files.is_empty() {
            return Err(CacheError::EmptyDataset(source.name.clone()));
        }
        if source.row_width == 0 {
            return Err(CacheError::Shape(format!(
                "modality '{}' has zero row width",
                source.name
            )));
        }
    }
    Ok(())
}
