// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Chunk Decoding
//!
//! A chunk is everything one backing-store file decodes to. Decoders are selected by file
//! extension through a [`DecoderRegistry`]; an extension nobody registered is an error,
//! never a silent fallback.
//!
//! Decoders may produce dense or sparse chunks. Readers only ever see dense rows, via
//! [`Chunk::into_dense`].

mod binary;
mod sparse;
mod text;

pub use binary::{encode_binary_chunk, BinaryDecoder, BINARY_MAGIC};
pub use sparse::{CooDecoder, SparseChunk};
pub use text::TextDecoder;

use ahash::AHashMap;
use ndarray::Array2;
use std::path::Path;

use crate::error::{CacheError, CacheResult};

/// Decoded contents of one file
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Dense(Array2<f32>),
    Sparse(SparseChunk),
}

impl Chunk {
    pub fn nrows(&self) -> usize {
        match self {
            Chunk::Dense(rows) => rows.nrows(),
            Chunk::Sparse(sparse) => sparse.rows,
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Chunk::Dense(rows) => rows.ncols(),
            Chunk::Sparse(sparse) => sparse.cols,
        }
    }

    /// Materialize as row-major dense rows
    pub fn into_dense(self) -> Array2<f32> {
        match self {
            Chunk::Dense(rows) => rows,
            Chunk::Sparse(sparse) => sparse.to_dense(),
        }
    }
}

/// A chunk plus the utterance lengths it declares, if any
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChunk {
    pub chunk: Chunk,
    /// Unpadded utterance lengths; they sum to `chunk.nrows()`
    pub segments: Option<Vec<usize>>,
}

impl DecodedChunk {
    pub fn dense(rows: Array2<f32>) -> Self {
        Self {
            chunk: Chunk::Dense(rows),
            segments: None,
        }
    }

    /// Utterance lengths, treating an unsegmented chunk as one utterance
    pub fn utterance_lengths(&self) -> Vec<usize> {
        match &self.segments {
            Some(segments) => segments.clone(),
            None if self.chunk.nrows() > 0 => vec![self.chunk.nrows()],
            None => Vec::new(),
        }
    }
}

/// Decoder for one file format
pub trait ChunkDecoder: Send + Sync {
    /// Format name for logging
    fn name(&self) -> &str;

    fn decode(&self, path: &Path) -> CacheResult<DecodedChunk>;
}

/// Maps lower-case file extensions to decoders
pub struct DecoderRegistry {
    decoders: AHashMap<String, Box<dyn ChunkDecoder>>,
}

impl DecoderRegistry {
    /// Registry with no formats at all
    pub fn empty() -> Self {
        Self {
            decoders: AHashMap::new(),
        }
    }

    /// Registry with the built-in binary, text and sparse formats
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("bin", BinaryDecoder);
        registry.register("f32", BinaryDecoder);
        registry.register("txt", TextDecoder);
        registry.register("csv", TextDecoder);
        registry.register("coo", CooDecoder);
        registry
    }

    /// Register (or replace) the decoder for `extension`
    pub fn register(&mut self, extension: &str, decoder: impl ChunkDecoder + 'static) {
        self.decoders
            .insert(extension.trim_start_matches('.').to_lowercase(), Box::new(decoder));
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.lookup(path).is_some()
    }

    fn lookup(&self, path: &Path) -> Option<&dyn ChunkDecoder> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        self.decoders.get(&extension).map(|d| d.as_ref())
    }

    /// Decode `path` with the decoder registered for its extension
    pub fn decode(&self, path: &Path) -> CacheResult<DecodedChunk> {
        let decoder = self.lookup(path).ok_or_else(|| CacheError::UnknownFormat {
            path: path.to_path_buf(),
        })?;

        let decoded = decoder.decode(path)?;
        if let Some(segments) = &decoded.segments {
            validate_segments(path, segments, decoded.chunk.nrows())?;
        }
        tracing::debug!(
            path = %path.display(),
            format = decoder.name(),
            rows = decoded.chunk.nrows(),
            cols = decoded.chunk.ncols(),
            "Decoded chunk"
        );
        Ok(decoded)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn validate_segments(path: &Path, segments: &[usize], rows: usize) -> CacheResult<()> {
    if segments.contains(&0) {
        return Err(CacheError::decode(path, "zero-length utterance"));
    }
    let total: usize = segments.iter().sum();
    if total != rows {
        return Err(CacheError::decode(
            path,
            format!("utterance lengths sum to {} but chunk has {} rows", total, rows),
        ));
    }
    Ok(())
}
