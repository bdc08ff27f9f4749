// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-modality preprocessing applied by the device tiers on every refill:
//! normalization, additive Gaussian noise and random crop ("shift") augmentation, in that
//! order.

use rand::Rng;
use serde::Deserialize;
use spool_device::ImageGeometry;
use std::path::Path;

use crate::error::{CacheError, CacheResult};

/// Added to every standard deviation before inverting it
pub const STD_EPSILON: f32 = 1e-5;

#[derive(Deserialize)]
struct StatsFile {
    mean: Vec<f32>,
    std: Vec<f32>,
}

/// Per-feature mean and inverse standard deviation
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationStats {
    mean: Vec<f32>,
    inv_std: Vec<f32>,
}

impl NormalizationStats {
    pub fn from_mean_std(mean: Vec<f32>, std: Vec<f32>) -> CacheResult<Self> {
        if mean.len() != std.len() {
            return Err(CacheError::Stats(format!(
                "mean has {} entries, std has {}",
                mean.len(),
                std.len()
            )));
        }
        if let Some(bad) = std.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return Err(CacheError::Stats(format!("invalid standard deviation {}", bad)));
        }
        let inv_std = std.iter().map(|s| 1.0 / (s + STD_EPSILON)).collect();
        Ok(Self { mean, inv_std })
    }

    /// Load `{"mean": [...], "std": [...]}`
    pub fn load(path: &Path) -> CacheResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: StatsFile = serde_json::from_str(&text)
            .map_err(|e| CacheError::Stats(format!("{}: {}", path.display(), e)))?;
        Self::from_mean_std(file.mean, file.std)
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn inv_std(&self) -> &[f32] {
        &self.inv_std
    }
}

/// Random crop of image-shaped samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftSpec {
    pub amount_x: usize,
    pub amount_y: usize,
    /// Always crop the center instead of a random window
    pub center_only: bool,
    pub image: ImageGeometry,
}

impl ShiftSpec {
    /// Geometry of the cropped samples
    pub fn output_geometry(&self) -> CacheResult<ImageGeometry> {
        Ok(self.image.cropped(self.amount_x, self.amount_y)?)
    }

    /// Top-left crop corner for each of `n` samples
    pub fn offsets<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<(usize, usize)> {
        if self.center_only {
            return vec![(self.amount_x, self.amount_y); n];
        }
        (0..n)
            .map(|_| {
                (
                    rng.gen_range(0..=2 * self.amount_x),
                    rng.gen_range(0..=2 * self.amount_y),
                )
            })
            .collect()
    }
}

/// Everything a device tier does to one modality after upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preprocess {
    pub normalize: Option<NormalizationStats>,
    /// Standard deviation of additive noise, if enabled
    pub noise_std: Option<f32>,
    pub shift: Option<ShiftSpec>,
}

impl Preprocess {
    pub fn is_identity(&self) -> bool {
        self.normalize.is_none() && self.noise_std.is_none() && self.shift.is_none()
    }

    /// Features per sample handed to the caller
    pub fn output_width(&self, row_width: usize) -> CacheResult<usize> {
        match &self.shift {
            Some(shift) => Ok(shift.output_geometry()?.len()),
            None => Ok(row_width),
        }
    }

    pub(crate) fn check(&self, name: &str, row_width: usize) -> CacheResult<()> {
        if let Some(stats) = &self.normalize {
            if stats.len() != row_width {
                return Err(CacheError::Stats(format!(
                    "modality '{}' has width {} but statistics of length {}",
                    name,
                    row_width,
                    stats.len()
                )));
            }
        }
        if let Some(shift) = &self.shift {
            if shift.image.len() != row_width {
                return Err(CacheError::Shape(format!(
                    "modality '{}' has width {} but image shape {:?}",
                    name, row_width, shift.image
                )));
            }
            shift.output_geometry()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    #[test]
    fn test_load_stats_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, r#"{"mean": [1.0, 2.0], "std": [0.0, 4.0]}"#).unwrap();

        let stats = NormalizationStats::load(&path).unwrap();
        assert_eq!(stats.mean(), &[1.0, 2.0]);
        assert!((stats.inv_std()[0] - 1e5).abs() < 1.0);
        assert!((stats.inv_std()[1] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_malformed_stats() {
        assert!(matches!(
            NormalizationStats::from_mean_std(vec![0.0], vec![]),
            Err(CacheError::Stats(_))
        ));
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, r#"{"mean": [1.0]}"#).unwrap();
        assert!(matches!(
            NormalizationStats::load(&path),
            Err(CacheError::Stats(_))
        ));
    }

    #[test]
    fn test_shift_offsets() {
        let shift = ShiftSpec {
            amount_x: 1,
            amount_y: 2,
            center_only: false,
            image: ImageGeometry::new(8, 6, 1),
        };
        assert_eq!(shift.output_geometry().unwrap(), ImageGeometry::new(4, 4, 1));

        let mut rng = StdRng::seed_from_u64(0);
        for (x, y) in shift.offsets(100, &mut rng) {
            assert!(x <= 2 && y <= 4);
        }
        let center = ShiftSpec {
            center_only: true,
            ..shift
        };
        assert_eq!(center.offsets(2, &mut rng), vec![(1, 2), (1, 2)]);
    }

    #[test]
    fn test_check_widths() {
        let pre = Preprocess {
            normalize: Some(NormalizationStats::from_mean_std(vec![0.0; 3], vec![1.0; 3]).unwrap()),
            ..Default::default()
        };
        assert!(pre.check("x", 3).is_ok());
        assert!(pre.check("x", 4).is_err());
        assert_eq!(pre.output_width(3).unwrap(), 3);
    }
}
