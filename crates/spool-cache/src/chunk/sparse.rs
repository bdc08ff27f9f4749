// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sparse coordinate-list chunks (`.coo`).
//!
//! ```text
//! # optional comments
//! 4 3                 rows cols
//! #segments 2 2       optional utterance lengths
//! 0 1 0.5             row col value
//! 3 2 -1.0
//! ```

use ndarray::Array2;
use std::path::Path;

use super::{Chunk, ChunkDecoder, DecodedChunk};
use crate::error::{CacheError, CacheResult};

/// Largest dense shape a `.coo` header may declare (1 GiB of `f32`)
pub const MAX_DENSE_ELEMENTS: usize = 1 << 28;

/// Coordinate-list representation of a chunk
#[derive(Debug, Clone, PartialEq)]
pub struct SparseChunk {
    pub rows: usize,
    pub cols: usize,
    /// `(row, col, value)`; duplicates accumulate
    pub entries: Vec<(usize, usize, f32)>,
}

impl SparseChunk {
    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for &(r, c, v) in &self.entries {
            dense[[r, c]] += v;
        }
        dense
    }
}

/// Decoder for `.coo` files
#[derive(Debug, Clone, Copy, Default)]
pub struct CooDecoder;

impl ChunkDecoder for CooDecoder {
    fn name(&self) -> &str {
        "coo"
    }

    fn decode(&self, path: &Path) -> CacheResult<DecodedChunk> {
        let text = std::fs::read_to_string(path)?;
        parse_coo(&text).map_err(|reason| CacheError::decode(path, reason))
    }
}

fn parse_numbers<T: std::str::FromStr>(line: &str, line_no: usize) -> Result<Vec<T>, String> {
    line.split_whitespace()
        .map(|t| {
            t.parse()
                .map_err(|_| format!("line {}: bad token '{}'", line_no + 1, t))
        })
        .collect()
}

fn parse_coo(text: &str) -> Result<DecodedChunk, String> {
    let mut shape: Option<(usize, usize)> = None;
    let mut segments = None;
    let mut entries = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#segments") {
            segments = Some(parse_numbers::<usize>(rest, line_no)?);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        match shape {
            None => {
                let dims = parse_numbers::<usize>(line, line_no)?;
                if dims.len() != 2 {
                    return Err(format!("line {}: expected 'rows cols'", line_no + 1));
                }
                let (rows, cols) = (dims[0], dims[1]);
                match rows.checked_mul(cols) {
                    Some(n) if n <= MAX_DENSE_ELEMENTS => {}
                    _ => {
                        return Err(format!(
                            "line {}: {}x{} exceeds {} dense elements",
                            line_no + 1,
                            rows,
                            cols,
                            MAX_DENSE_ELEMENTS
                        ))
                    }
                }
                shape = Some((rows, cols));
            }
            Some((rows, cols)) => {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() != 3 {
                    return Err(format!("line {}: expected 'row col value'", line_no + 1));
                }
                let r: usize = fields[0]
                    .parse()
                    .map_err(|_| format!("line {}: bad row", line_no + 1))?;
                let c: usize = fields[1]
                    .parse()
                    .map_err(|_| format!("line {}: bad column", line_no + 1))?;
                let v: f32 = fields[2]
                    .parse()
                    .map_err(|_| format!("line {}: bad value", line_no + 1))?;
                if r >= rows || c >= cols {
                    return Err(format!(
                        "line {}: entry ({}, {}) outside {}x{}",
                        line_no + 1,
                        r,
                        c,
                        rows,
                        cols
                    ));
                }
                entries.push((r, c, v));
            }
        }
    }

    let (rows, cols) = shape.ok_or_else(|| "missing 'rows cols' header".to_string())?;
    Ok(DecodedChunk {
        chunk: Chunk::Sparse(SparseChunk {
            rows,
            cols,
            entries,
        }),
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_coo_materializes_dense() {
        let decoded = parse_coo("# demo\n3 2\n#segments 1 2\n0 1 0.5\n2 0 -1\n2 0 -1\n").unwrap();
        assert_eq!(decoded.segments, Some(vec![1, 2]));
        assert_eq!(decoded.chunk.ncols(), 2);
        assert_eq!(
            decoded.chunk.into_dense(),
            array![[0.0, 0.5], [0.0, 0.0], [-2.0, 0.0]]
        );
    }

    #[test]
    fn test_out_of_range_entry() {
        assert!(parse_coo("2 2\n2 0 1.0\n").is_err());
        assert!(parse_coo("0 1 1.0\n").is_err());
    }

    #[test]
    fn test_oversized_shape_rejected() {
        assert!(parse_coo("1000000 1000000
0 0 1.0
").is_err());
        assert!(parse_coo("18446744073709551615 2
").is_err());
        assert!(parse_coo("16384 16384
").is_ok());
    }
}
