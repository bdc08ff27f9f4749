// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dense text chunks: one row per line, values split on whitespace or commas. A blank line
//! closes the current utterance and `#` starts a comment line.

use ndarray::Array2;
use std::path::Path;

use super::{Chunk, ChunkDecoder, DecodedChunk};
use crate::error::{CacheError, CacheResult};

/// Decoder for `.txt` / `.csv` files
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl ChunkDecoder for TextDecoder {
    fn name(&self) -> &str {
        "text"
    }

    fn decode(&self, path: &Path) -> CacheResult<DecodedChunk> {
        let text = std::fs::read_to_string(path)?;
        parse_text(&text).map_err(|reason| CacheError::decode(path, reason))
    }
}

fn parse_text(text: &str) -> Result<DecodedChunk, String> {
    let mut values = Vec::new();
    let mut cols: Option<usize> = None;
    let mut segments = Vec::new();
    let mut current = 0usize;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            if current > 0 {
                segments.push(current);
                current = 0;
            }
            continue;
        }

        let before = values.len();
        for token in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let value: f32 = token
                .parse()
                .map_err(|_| format!("line {}: '{}' is not a number", line_no + 1, token))?;
            values.push(value);
        }

        let width = values.len() - before;
        match cols {
            None => cols = Some(width),
            Some(expected) if expected != width => {
                return Err(format!(
                    "line {} has {} values, expected {}",
                    line_no + 1,
                    width,
                    expected
                ));
            }
            Some(_) => {}
        }
        current += 1;
    }
    if current > 0 {
        segments.push(current);
    }

    let cols = cols.unwrap_or(0);
    let rows = segments.iter().sum();
    let dense = Array2::from_shape_vec((rows, cols), values).map_err(|e| e.to_string())?;

    Ok(DecodedChunk {
        chunk: Chunk::Dense(dense),
        segments: if segments.len() > 1 { Some(segments) } else { None },
    })
}
