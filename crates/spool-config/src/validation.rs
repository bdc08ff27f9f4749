// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! This module provides validation logic to ensure configuration values are
//! consistent, within valid ranges, and describe a pipeline that can be built.

use std::collections::HashSet;

use crate::{ConfigError, ConfigResult, ModalityConfig, SpoolConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    DuplicateModality { name: String },
    InvalidValue { field: String, reason: String },
    CapacityTooSmall { tier: String, bytes: u64, bytes_per_row: u64 },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::DuplicateModality { name } => {
                write!(f, "Modality '{}' is declared more than once", name)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
            Self::CapacityTooSmall {
                tier,
                bytes,
                bytes_per_row,
            } => {
                write!(
                    f,
                    "{}.capacity = {} bytes cannot hold a single row ({} bytes per row)",
                    tier, bytes, bytes_per_row
                )
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - At least one modality, with unique non-empty names
/// - Positive row widths and at least one backing file per modality
/// - Normalization stats present when normalization is on
/// - Shift geometry consistent with the row width
/// - Tier capacities large enough for one row of every modality
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` with details if validation fails
pub fn validate_config(config: &SpoolConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_modalities(config, &mut errors);
    validate_capacities(config, &mut errors);
    validate_value_ranges(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_modalities(config: &SpoolConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.modalities.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "modalities".to_string(),
        });
        return;
    }

    let mut seen = HashSet::new();
    for (index, modality) in config.modalities.iter().enumerate() {
        let field = |name: &str| format!("modalities[{}].{}", index, name);

        if modality.name.is_empty() {
            errors.push(ConfigValidationError::MissingRequired {
                field: field("name"),
            });
        } else if !seen.insert(modality.name.as_str()) {
            errors.push(ConfigValidationError::DuplicateModality {
                name: modality.name.clone(),
            });
        }

        if modality.row_width == 0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: field("row_width"),
                reason: "must be positive".to_string(),
            });
        }

        if modality.files.is_empty() {
            errors.push(ConfigValidationError::MissingRequired {
                field: field("files"),
            });
        }

        if modality.normalize && modality.stats.is_none() {
            errors.push(ConfigValidationError::MissingRequired {
                field: field("stats"),
            });
        }

        if modality.augment_noise && !(modality.noise_std.is_finite() && modality.noise_std >= 0.0) {
            errors.push(ConfigValidationError::InvalidValue {
                field: field("noise_std"),
                reason: "must be a finite, non-negative number".to_string(),
            });
        }

        validate_shift(modality, &field("augment_shift"), errors);
    }
}

fn validate_shift(modality: &ModalityConfig, field: &str, errors: &mut Vec<ConfigValidationError>) {
    let Some(shift) = &modality.augment_shift else {
        return;
    };

    let [height, width, channels] = shift.image_shape;
    if height * width * channels != modality.row_width {
        errors.push(ConfigValidationError::InvalidValue {
            field: format!("{}.image_shape", field),
            reason: format!(
                "{}x{}x{} does not match row_width {}",
                height, width, channels, modality.row_width
            ),
        });
    }
    if 2 * shift.amount_x >= width {
        errors.push(ConfigValidationError::InvalidValue {
            field: format!("{}.amount_x", field),
            reason: format!("cropping 2x{} leaves nothing of width {}", shift.amount_x, width),
        });
    }
    if 2 * shift.amount_y >= height {
        errors.push(ConfigValidationError::InvalidValue {
            field: format!("{}.amount_y", field),
            reason: format!("cropping 2x{} leaves nothing of height {}", shift.amount_y, height),
        });
    }
    if config_is_sequence_shift(modality) {
        errors.push(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            reason: "shift augmentation cannot be combined with context windows".to_string(),
        });
    }
}

fn config_is_sequence_shift(modality: &ModalityConfig) -> bool {
    modality.augment_shift.is_some() && (modality.left_window > 0 || modality.right_window > 0)
}

fn validate_capacities(config: &SpoolConfig, errors: &mut Vec<ConfigValidationError>) {
    let bytes_per_row = config.bytes_per_row();
    if bytes_per_row == 0 {
        return;
    }

    if config.host_capacity_rows() == 0 {
        errors.push(ConfigValidationError::CapacityTooSmall {
            tier: "host".to_string(),
            bytes: config.host.capacity.as_u64(),
            bytes_per_row,
        });
    }
    if config.device_capacity_rows() == 0 {
        errors.push(ConfigValidationError::CapacityTooSmall {
            tier: "device".to_string(),
            bytes: config.device.capacity.as_u64(),
            bytes_per_row,
        });
    }
}

fn validate_value_ranges(config: &SpoolConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.sequence.alignment == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "sequence.alignment".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let level = config.system.log_level.to_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "system.log_level".to_string(),
            reason: "must be one of trace, debug, info, warn, error".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByteSize, ShiftConfig};
    use std::path::PathBuf;

    fn valid_config() -> SpoolConfig {
        let mut config = SpoolConfig::default();
        config.modalities.push(ModalityConfig {
            name: "features".to_string(),
            row_width: 12,
            files: vec![PathBuf::from("feats.bin")],
            ..Default::default()
        });
        config.modalities.push(ModalityConfig {
            name: "labels".to_string(),
            row_width: 1,
            files: vec![PathBuf::from("labels.bin")],
            ..Default::default()
        });
        config
    }

    fn expect_message(config: &SpoolConfig, needle: &str) {
        match validate_config(config) {
            Err(ConfigError::ValidationError(msg)) => {
                assert!(msg.contains(needle), "'{}' not in '{}'", needle, msg)
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_no_modalities() {
        expect_message(&SpoolConfig::default(), "modalities");
    }

    #[test]
    fn test_duplicate_modality() {
        let mut config = valid_config();
        config.modalities[1].name = "features".to_string();
        expect_message(&config, "declared more than once");
    }

    #[test]
    fn test_zero_width_and_missing_files() {
        let mut config = valid_config();
        config.modalities[0].row_width = 0;
        config.modalities[1].files.clear();
        expect_message(&config, "modalities[0].row_width");
        expect_message(&config, "modalities[1].files");
    }

    #[test]
    fn test_normalize_requires_stats() {
        let mut config = valid_config();
        config.modalities[0].normalize = true;
        expect_message(&config, "modalities[0].stats");
    }

    #[test]
    fn test_shift_geometry_must_match_width() {
        let mut config = valid_config();
        config.modalities[0].augment_shift = Some(ShiftConfig {
            amount_x: 1,
            amount_y: 0,
            center_only: false,
            image_shape: [2, 2, 2],
        });
        expect_message(&config, "does not match row_width 12");
    }

    #[test]
    fn test_shift_cannot_consume_image() {
        let mut config = valid_config();
        config.modalities[0].augment_shift = Some(ShiftConfig {
            amount_x: 1,
            amount_y: 0,
            center_only: false,
            image_shape: [6, 2, 1],
        });
        expect_message(&config, "amount_x");
    }

    #[test]
    fn test_capacity_too_small() {
        let mut config = valid_config();
        config.device.capacity = ByteSize(16);
        expect_message(&config, "device.capacity");
    }

    #[test]
    fn test_zero_alignment() {
        let mut config = valid_config();
        config.sequence.alignment = 0;
        expect_message(&config, "sequence.alignment");
    }
}
