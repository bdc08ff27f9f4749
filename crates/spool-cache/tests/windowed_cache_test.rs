// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Windowed Cache Tests
//!
//! Every frame carries its utterance id in column 0 and its dataset frame index in
//! column 1, so a window that straddles two utterances or a modality that drifts out of
//! step is visible directly in the returned values.

use ndarray::{Array2, Axis};
use spool_cache::*;
use spool_device::CpuBackend;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Tagged frames for utterances of the given lengths: `[utterance id, frame index]`
fn tagged(lengths: &[usize]) -> Array2<f32> {
    let total: usize = lengths.iter().sum();
    let mut data = Array2::zeros((total, 2));
    let mut frame = 0;
    for (utt, &length) in lengths.iter().enumerate() {
        for _ in 0..length {
            data[[frame, 0]] = utt as f32;
            data[[frame, 1]] = frame as f32;
            frame += 1;
        }
    }
    data
}

fn write(dir: &Path, name: &str, lengths: &[usize]) -> PathBuf {
    let path = dir.join(name);
    encode_binary_chunk(&path, &tagged(lengths), Some(lengths)).unwrap();
    path
}

fn windowed_device(
    sources: Vec<ModalitySource>,
    host: TierOptions,
    options: WindowedDeviceOptions,
) -> WindowedDeviceCache<CpuBackend> {
    let host = WindowedRowCache::new(SequenceReader::new(sources).unwrap(), host).unwrap();
    WindowedDeviceCache::new(host, CpuBackend::new(), options, vec![]).unwrap()
}

#[test]
fn test_windowed_concrete_scenario() {
    // Unpadded [3, 5] frames padded by one frame per side give boundary list [5, 7].
    let dir = tempdir().unwrap();
    let x = write(dir.path(), "x.bin", &[3, 5]);
    let mut cache = windowed_device(
        vec![ModalitySource::new("x", 2, vec![x]).with_window(1, 1)],
        TierOptions::new(64),
        WindowedDeviceOptions::new(TierOptions::new(64)),
    );

    let first = cache.get(4).unwrap();
    let rows = first.get("x").unwrap().view.to_rows().unwrap();
    // Center frame of each window lives in columns 2..4.
    let utterances: Vec<f32> = rows.column(2).to_vec();
    let frames: Vec<f32> = rows.column(3).to_vec();
    assert_eq!(utterances, vec![0.0, 0.0, 0.0, 1.0]);
    assert_eq!(frames, vec![0.0, 1.0, 2.0, 3.0]);
    drop(first);

    let second = cache.get(4).unwrap();
    let rows = second.get("x").unwrap().view.to_rows().unwrap();
    // Resumes at utterance 1, center index 1.
    assert_eq!(rows[[0, 2]], 1.0);
    assert_eq!(rows[[0, 3]], 4.0);
    assert!(second.end_of_epoch());
}

#[test]
fn test_windows_never_cross_utterances() {
    let dir = tempdir().unwrap();
    let lengths = [4, 1, 9, 2, 6, 3, 7, 5, 1, 8];
    let x = write(dir.path(), "x.bin", &lengths);
    let y = write(dir.path(), "y.bin", &lengths);
    let tier = TierOptions::new(30).shuffled(5);
    let mut cache = windowed_device(
        vec![
            ModalitySource::new("x", 2, vec![x]).with_window(2, 3),
            ModalitySource::new("y", 2, vec![y]),
        ],
        tier,
        WindowedDeviceOptions {
            allow_partial: true,
            ..WindowedDeviceOptions::new(TierOptions::new(24).shuffled(6))
        },
    );

    let mut centers_seen = 0;
    for _ in 0..40 {
        let batch = cache.get(6).unwrap();
        let host = batch.to_host_rows().unwrap();
        let x = &host["x"];
        let y = &host["y"];
        assert_eq!(x.ncols(), 6 * 2);
        assert_eq!(y.ncols(), 2);

        for (xw, yw) in x.axis_iter(Axis(0)).zip(y.axis_iter(Axis(0))) {
            let utt = xw[0];
            for frame in 0..6 {
                assert_eq!(xw[frame * 2], utt, "window spans utterances: {:?}", xw);
            }
            // Center of x (offset 0 sits after two left frames) is y's frame.
            assert_eq!(xw[4], yw[0]);
            assert_eq!(xw[5], yw[1]);
        }
        centers_seen += batch.len();
    }
    assert!(centers_seen > 46);
}

#[test]
fn test_alignment_multiple_on_device() {
    let dir = tempdir().unwrap();
    let x = write(dir.path(), "x.bin", &[5, 6, 4]);
    let mut cache = windowed_device(
        vec![ModalitySource::new("x", 2, vec![x])],
        TierOptions::new(64),
        WindowedDeviceOptions {
            alignment: 4,
            allow_partial: true,
            ..WindowedDeviceOptions::new(TierOptions::new(64))
        },
    );
    for _ in 0..10 {
        let batch = cache.get(10).unwrap();
        assert_eq!(batch.len() % 4, 0);
        assert!(batch.len() > 0);
    }
}

#[test]
fn test_windowed_host_cache_alignment_and_counts() {
    let dir = tempdir().unwrap();
    let x = write(dir.path(), "x.bin", &[5, 7]);
    let y = write(dir.path(), "y.bin", &[5, 7]);
    let reader = SequenceReader::new(vec![
        ModalitySource::new("x", 2, vec![x]).with_window(1, 1),
        ModalitySource::new("y", 2, vec![y]).with_window(3, 0),
    ])
    .unwrap();
    let mut cache = WindowedRowCache::new(reader, TierOptions::new(64)).unwrap();

    let batch = cache.get(7, 3).unwrap();
    assert_eq!(batch.len(), 6);
    let x = batch.get("x").unwrap();
    let y = batch.get("y").unwrap();
    assert_eq!(x.centers.len(), y.centers.len());
    // Both modalities name the same dataset frames as centers.
    for (&cx, &cy) in x.centers.iter().zip(&y.centers) {
        assert_eq!(x.rows[[cx, 1]], y.rows[[cy, 1]]);
    }
    let stacked = x.windows();
    assert_eq!(stacked.dim(), (6, 6));
}

#[test]
fn test_mismatched_utterance_counts_fail() {
    let dir = tempdir().unwrap();
    let x = write(dir.path(), "x.bin", &[3, 3]);
    let y = write(dir.path(), "y.bin", &[6]);
    let reader = SequenceReader::new(vec![
        ModalitySource::new("x", 2, vec![x]),
        ModalitySource::new("y", 2, vec![y]),
    ])
    .unwrap();
    let mut cache = WindowedRowCache::new(reader, TierOptions::new(64)).unwrap();
    let err = cache.get(2, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
}

#[test]
fn test_device_refill_crosses_host_loads() {
    // Host holds [6, 3]; a device buffer of 6 needs the 3 from one load and the 2 from
    // the next to serve a batch of 5.
    let dir = tempdir().unwrap();
    let x = write(dir.path(), "x.bin", &[6, 3, 2]);
    let mut cache = windowed_device(
        vec![ModalitySource::new("x", 2, vec![x])],
        TierOptions::new(10),
        WindowedDeviceOptions::new(TierOptions::new(6)),
    );

    let mut ends = Vec::new();
    for _ in 0..6 {
        let batch = cache.get(5).unwrap();
        assert_eq!(batch.len(), 5);
        ends.push(batch.end_of_epoch());
    }
    assert_eq!(ends, vec![false, true, false, true, false, true]);
    assert_eq!(cache.stats().rows_dropped, 3);
}

#[test]
fn test_epoch_serves_every_frame_across_uneven_tiers() {
    let dir = tempdir().unwrap();
    let x = write(dir.path(), "x.bin", &[4, 4, 4, 4, 4]);
    let mut cache = windowed_device(
        vec![ModalitySource::new("x", 2, vec![x])],
        TierOptions::new(12),
        WindowedDeviceOptions {
            allow_partial: true,
            ..WindowedDeviceOptions::new(TierOptions::new(8))
        },
    );

    let mut frames = Vec::new();
    let mut sizes = Vec::new();
    loop {
        let batch = cache.get(8).unwrap();
        sizes.push(batch.len());
        let rows = batch.to_host_rows().unwrap();
        frames.extend(rows["x"].column(1).iter().map(|&f| f as usize));
        if batch.end_of_epoch() {
            break;
        }
    }
    assert_eq!(sizes, vec![8, 8, 4]);
    assert_eq!(frames, (0..20).collect::<Vec<_>>());
    assert_eq!(cache.stats().rows_dropped, 0);
    assert_eq!(cache.host_stats().epochs, 1);
}
