// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dense binary chunk format.
//!
//! ```text
//! [ "SPL1" ][ rows: u32 ][ cols: u32 ][ n_segments: u32 ]
//! [ segment length: u32 ] x n_segments
//! [ value: f32 ] x rows * cols          (row-major)
//! ```
//! All integers and floats are little-endian.

use byteorder::{ByteOrder, LittleEndian};
use ndarray::Array2;
use std::path::Path;

use super::{Chunk, ChunkDecoder, DecodedChunk};
use crate::error::{CacheError, CacheResult};

/// File magic for the dense binary format
pub const BINARY_MAGIC: &[u8; 4] = b"SPL1";

const HEADER_BYTES: usize = 16;

/// Decoder for `.bin` / `.f32` files
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryDecoder;

impl ChunkDecoder for BinaryDecoder {
    fn name(&self) -> &str {
        "binary"
    }

    fn decode(&self, path: &Path) -> CacheResult<DecodedChunk> {
        let bytes = std::fs::read(path)?;
        decode_bytes(&bytes).map_err(|reason| CacheError::decode(path, reason))
    }
}

fn decode_bytes(bytes: &[u8]) -> Result<DecodedChunk, String> {
    if bytes.len() < HEADER_BYTES {
        return Err(format!("file of {} bytes has no header", bytes.len()));
    }
    if &bytes[0..4] != BINARY_MAGIC {
        return Err("bad magic".to_string());
    }
    let rows = LittleEndian::read_u32(&bytes[4..8]) as usize;
    let cols = LittleEndian::read_u32(&bytes[8..12]) as usize;
    let n_segments = LittleEndian::read_u32(&bytes[12..16]) as usize;

    let data_start = n_segments
        .checked_mul(4)
        .and_then(|n| n.checked_add(HEADER_BYTES));
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .zip(data_start)
        .and_then(|(data, start)| data.checked_add(start));
    let (Some(data_start), Some(expected)) = (data_start, expected) else {
        return Err(format!(
            "header describes {}x{} with {} segments, more than addressable",
            rows, cols, n_segments
        ));
    };
    if bytes.len() != expected {
        return Err(format!(
            "expected {} bytes for {}x{} with {} segments, found {}",
            expected,
            rows,
            cols,
            n_segments,
            bytes.len()
        ));
    }

    let segments = if n_segments == 0 {
        None
    } else {
        let mut lengths = vec![0u32; n_segments];
        LittleEndian::read_u32_into(&bytes[HEADER_BYTES..data_start], &mut lengths);
        Some(lengths.into_iter().map(|l| l as usize).collect())
    };

    let mut values = vec![0f32; rows * cols];
    LittleEndian::read_f32_into(&bytes[data_start..], &mut values);
    let dense = Array2::from_shape_vec((rows, cols), values).map_err(|e| e.to_string())?;

    Ok(DecodedChunk {
        chunk: Chunk::Dense(dense),
        segments,
    })
}

/// Write `rows` (and optional utterance lengths) in the dense binary format
pub fn encode_binary_chunk(
    path: &Path,
    rows: &Array2<f32>,
    segments: Option<&[usize]>,
) -> CacheResult<()> {
    let segments = segments.unwrap_or(&[]);
    let values: Vec<f32> = rows.iter().copied().collect();
    let data_start = HEADER_BYTES + 4 * segments.len();
    let mut bytes = vec![0u8; data_start + 4 * values.len()];

    bytes[0..4].copy_from_slice(BINARY_MAGIC);
    LittleEndian::write_u32(&mut bytes[4..8], rows.nrows() as u32);
    LittleEndian::write_u32(&mut bytes[8..12], rows.ncols() as u32);
    LittleEndian::write_u32(&mut bytes[12..16], segments.len() as u32);
    for (i, &length) in segments.iter().enumerate() {
        let at = HEADER_BYTES + 4 * i;
        LittleEndian::write_u32(&mut bytes[at..at + 4], length as u32);
    }
    LittleEndian::write_f32_into(&values, &mut bytes[data_start..]);

    std::fs::write(path, bytes)?;
    Ok(())
}
