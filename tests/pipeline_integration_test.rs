// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Pipeline Integration Tests
//!
//! Full path from a `spool.toml` on disk to device batches.

use std::path::{Path, PathBuf};

use ndarray::{array, Array, Array2};
use spool::cache::encode_binary_chunk;
use spool::config::ConfigError;
use spool::device::DeviceError;
use spool::{Pipeline, SequencePipeline, SpoolError};
use tempfile::tempdir;

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("spool.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_pipeline_from_toml_serves_three_three_three_one() {
    let dir = tempdir().unwrap();
    let x = Array::from_shape_fn((10, 4), |(r, c)| (r * 4 + c) as f32);
    encode_binary_chunk(&dir.path().join("x.bin"), &x, None).unwrap();
    encode_binary_chunk(&dir.path().join("y.bin"), &x.mapv(|v| -v), None).unwrap();

    // Two width-4 modalities: 32 bytes per row, ten rows per tier.
    let config = write_config(
        dir.path(),
        r#"
[host]
capacity = 320

[device]
capacity = 320
allow_partial_final_batch = true
backend = "cpu"

[[modalities]]
name = "x"
row_width = 4
files = ["x.bin"]

[[modalities]]
name = "y"
row_width = 4
files = ["y.bin"]
"#,
    );

    let mut pipeline = Pipeline::load(Some(&config)).unwrap();
    assert_eq!(pipeline.cache().capacity(), 10);

    let mut sizes = Vec::new();
    for _ in 0..4 {
        let batch = pipeline.next_batch(3).unwrap();
        sizes.push(batch.len());
        let rows = batch.to_host_rows().unwrap();
        assert_eq!(rows["x"], rows["y"].mapv(|v| -v));
    }
    assert_eq!(sizes, vec![3, 3, 3, 1]);

    let (host, device) = pipeline.stats();
    assert_eq!(device.rows_served, 10);
    assert_eq!(host.epochs, 1);
}

#[test]
fn test_normalization_stats_from_json() {
    let dir = tempdir().unwrap();
    let x: Array2<f32> = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
    encode_binary_chunk(&dir.path().join("x.bin"), &x, None).unwrap();
    std::fs::write(
        dir.path().join("stats.json"),
        serde_json::json!({"mean": [1.0, 2.0], "std": [0.5, 1.0]}).to_string(),
    )
    .unwrap();

    let config = write_config(
        dir.path(),
        r#"
[host]
capacity = "1K"

[device]
capacity = "1K"

[[modalities]]
name = "x"
row_width = 2
files = ["x.bin"]
normalize = true
stats = "stats.json"
"#,
    );

    let mut pipeline = Pipeline::load(Some(&config)).unwrap();
    let batch = pipeline.next_batch(3).unwrap();
    let rows = batch.get("x").unwrap().to_rows().unwrap();
    let expected = array![[0.0f32, 0.0], [2.0, 2.0], [4.0, 4.0]];
    for (got, want) in rows.iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-3, "{} vs {}", got, want);
    }
}

#[test]
fn test_sequence_pipeline_aligned_batches() {
    let dir = tempdir().unwrap();
    let frames = Array::from_shape_fn((12, 1), |(r, _)| r as f32);
    encode_binary_chunk(&dir.path().join("x.bin"), &frames, Some(&[5, 7])).unwrap();
    encode_binary_chunk(&dir.path().join("y.bin"), &frames, Some(&[5, 7])).unwrap();

    let config = write_config(
        dir.path(),
        r#"
[host]
capacity = "64K"

[device]
capacity = "64K"

[sequence]
enabled = true
alignment = 2

[[modalities]]
name = "x"
row_width = 1
files = ["x.bin"]
left_window = 1
right_window = 1

[[modalities]]
name = "y"
row_width = 1
files = ["y.bin"]
"#,
    );

    let mut pipeline = SequencePipeline::load(Some(&config)).unwrap();
    let mut ends = Vec::new();
    for _ in 0..3 {
        let batch = pipeline.next_batch(5).unwrap();
        assert_eq!(batch.len(), 4);
        let rows = batch.to_host_rows().unwrap();
        assert_eq!(rows["x"].ncols(), 3);
        // Middle frame of every x window is the y frame.
        assert_eq!(rows["x"].column(1), rows["y"].column(0));
        ends.push(batch.end_of_epoch());
    }
    assert_eq!(ends, vec![false, false, true]);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[modalities]]
name = "x"
row_width = 2
files = ["x.bin"]
normalize = true
"#,
    );
    let err = Pipeline::load(Some(&config)).err().unwrap();
    assert!(matches!(err, SpoolError::Config(ConfigError::ValidationError(_))));
}

#[test]
fn test_unknown_backend_is_device_error() {
    let dir = tempdir().unwrap();
    encode_binary_chunk(&dir.path().join("x.bin"), &Array2::zeros((2, 2)), None).unwrap();
    let config = write_config(
        dir.path(),
        r#"
[device]
backend = "quantum"

[[modalities]]
name = "x"
row_width = 2
files = ["x.bin"]
"#,
    );
    let err = Pipeline::load(Some(&config)).err().unwrap();
    assert!(matches!(err, SpoolError::Device(DeviceError::InvalidBackend(_))));
}
