// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `spool.toml`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ConfigError;

/// Bytes per stored element (all tiers hold `f32`)
pub const BYTES_PER_ELEMENT: u64 = 4;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SpoolConfig {
    pub system: SystemConfig,
    pub host: HostTierConfig,
    pub device: DeviceTierConfig,
    pub sequence: SequenceConfig,
    pub modalities: Vec<ModalityConfig>,
}

impl SpoolConfig {
    /// Bytes needed to hold one row of every modality
    pub fn bytes_per_row(&self) -> u64 {
        self.modalities
            .iter()
            .map(|m| m.row_width as u64 * BYTES_PER_ELEMENT)
            .sum()
    }

    /// Host tier capacity in rows, shared by every modality
    pub fn host_capacity_rows(&self) -> usize {
        self.host.capacity.rows_for(self.bytes_per_row())
    }

    /// Device tier capacity in rows, shared by every modality
    pub fn device_capacity_rows(&self) -> usize {
        self.device.capacity.rows_for(self.bytes_per_row())
    }

    /// Look up a modality by name
    pub fn modality(&self, name: &str) -> Option<&ModalityConfig> {
        self.modalities.iter().find(|m| m.name == name)
    }
}

/// System-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub log_level: String,
    /// Seed for every random stream in the pipeline
    pub seed: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            seed: 0,
        }
    }
}

/// Host-memory tier (row cache)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostTierConfig {
    pub capacity: ByteSize,
    pub shuffle: bool,
}

impl Default for HostTierConfig {
    fn default() -> Self {
        Self {
            capacity: ByteSize::gibibytes(1),
            shuffle: false,
        }
    }
}

/// Device-memory tier
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceTierConfig {
    pub capacity: ByteSize,
    pub shuffle: bool,
    pub allow_partial_final_batch: bool,
    /// Backend name, parsed by the device crate ("cpu", "auto")
    pub backend: String,
}

impl Default for DeviceTierConfig {
    fn default() -> Self {
        Self {
            capacity: ByteSize::mebibytes(256),
            shuffle: false,
            allow_partial_final_batch: false,
            backend: "auto".to_string(),
        }
    }
}

/// Windowed (sequence) pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub enabled: bool,
    /// Number of valid centers per batch is rounded down to a multiple of this
    pub alignment: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alignment: 1,
        }
    }
}

/// One named data stream
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModalityConfig {
    pub name: String,
    pub row_width: usize,
    pub files: Vec<PathBuf>,
    pub left_window: usize,
    pub right_window: usize,
    pub normalize: bool,
    /// JSON file with `mean` and `std` vectors
    pub stats: Option<PathBuf>,
    pub augment_noise: bool,
    pub noise_std: f32,
    pub augment_shift: Option<ShiftConfig>,
}

impl Default for ModalityConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            row_width: 0,
            files: Vec::new(),
            left_window: 0,
            right_window: 0,
            normalize: false,
            stats: None,
            augment_noise: false,
            noise_std: 0.1,
            augment_shift: None,
        }
    }
}

impl ModalityConfig {
    pub fn window_size(&self) -> usize {
        self.left_window + 1 + self.right_window
    }
}

/// Random crop augmentation over samples interpreted as images
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShiftConfig {
    pub amount_x: usize,
    pub amount_y: usize,
    pub center_only: bool,
    /// `[height, width, channels]`
    pub image_shape: [usize; 3],
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            amount_x: 0,
            amount_y: 0,
            center_only: false,
            image_shape: [0, 0, 1],
        }
    }
}

/// A byte count that accepts human-readable suffixes in config files.
///
/// `"512"`, `"64K"`, `"256M"`, `"2G"`, `"1.5GiB"` and bare integers all parse.
/// Suffixes are base 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn bytes(n: u64) -> Self {
        Self(n)
    }

    pub const fn kibibytes(n: u64) -> Self {
        Self(n * 1024)
    }

    pub const fn mebibytes(n: u64) -> Self {
        Self(n * 1024 * 1024)
    }

    pub const fn gibibytes(n: u64) -> Self {
        Self(n * 1024 * 1024 * 1024)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whole rows of `bytes_per_row` bytes that fit in this size
    pub fn rows_for(&self, bytes_per_row: u64) -> usize {
        if bytes_per_row == 0 {
            return 0;
        }
        (self.0 / bytes_per_row) as usize
    }
}

impl FromStr for ByteSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidValue("empty byte size".to_string()));
        }

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => 1024,
            "M" | "MB" | "MIB" => 1024 * 1024,
            "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
            "T" | "TB" | "TIB" => 1024 * 1024 * 1024 * 1024,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "unknown byte size suffix '{}' in '{}'",
                    other, s
                )))
            }
        };

        if number.contains('.') {
            let value: f64 = number
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("invalid byte size '{}'", s)))?;
            Ok(ByteSize((value * multiplier as f64) as u64))
        } else {
            let value: u64 = number
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("invalid byte size '{}'", s)))?;
            value
                .checked_mul(multiplier)
                .map(ByteSize)
                .ok_or_else(|| ConfigError::InvalidValue(format!("byte size '{}' overflows", s)))
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(&str, u64); 3] = [
            ("G", 1024 * 1024 * 1024),
            ("M", 1024 * 1024),
            ("K", 1024),
        ];
        for (suffix, size) in UNITS {
            if self.0 >= size && self.0 % size == 0 {
                return write!(f, "{}{}", self.0 / size, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(ByteSize(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
