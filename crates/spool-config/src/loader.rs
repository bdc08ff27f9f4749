// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base values)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ByteSize, ConfigError, ConfigResult, SpoolConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "spool.toml";

/// Find the Spool configuration file
///
/// Search order:
/// 1. `SPOOL_CONFIG_PATH` environment variable
/// 2. Current working directory: `./spool.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("SPOOL_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        } else {
            return Err(ConfigError::FileNotFound(format!(
                "Config file specified by SPOOL_CONFIG_PATH not found: {}",
                path.display()
            )));
        }
    }

    let mut search_paths = Vec::new();

    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "Configuration file '{}' not found in any of these locations:\n{}\n\nSet SPOOL_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// Relative paths inside `[[modalities]]` (`files`, `stats`) are resolved against the
/// directory containing the config file.
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<SpoolConfig> {
    let config_file = if let Some(path) = config_path {
        path.to_path_buf()
    } else {
        find_config_file()?
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: SpoolConfig = toml::from_str(&content)?;

    if let Some(base) = config_file.parent() {
        resolve_relative_paths(&mut config, base);
    }

    apply_environment_overrides(&mut config)?;

    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    Ok(config)
}

fn resolve_relative_paths(config: &mut SpoolConfig, base: &Path) {
    for modality in &mut config.modalities {
        for file in &mut modality.files {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
        if let Some(stats) = modality.stats.as_mut() {
            if stats.is_relative() {
                *stats = base.join(&*stats);
            }
        }
    }
}

fn parse_flag(value: &str) -> bool {
    let lower = value.to_lowercase();
    lower == "true" || lower == "1" || lower == "yes"
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `SPOOL_HOST_CAPACITY` -> `host.capacity`
/// - `SPOOL_DEVICE_CAPACITY` -> `device.capacity`
/// - `SPOOL_SHUFFLE` -> `host.shuffle` and `device.shuffle`
/// - `SPOOL_ALLOW_PARTIAL` -> `device.allow_partial_final_batch`
/// - `SPOOL_SEED` -> `system.seed`
/// - `SPOOL_LOG_LEVEL` -> `system.log_level`
/// - `SPOOL_ALIGNMENT` -> `sequence.alignment`
///
/// Capacities must parse; other malformed numeric values are ignored.
pub fn apply_environment_overrides(config: &mut SpoolConfig) -> ConfigResult<()> {
    if let Ok(value) = env::var("SPOOL_HOST_CAPACITY") {
        config.host.capacity = value.parse::<ByteSize>()?;
    }
    if let Ok(value) = env::var("SPOOL_DEVICE_CAPACITY") {
        config.device.capacity = value.parse::<ByteSize>()?;
    }
    if let Ok(value) = env::var("SPOOL_SHUFFLE") {
        let shuffle = parse_flag(&value);
        config.host.shuffle = shuffle;
        config.device.shuffle = shuffle;
    }
    if let Ok(value) = env::var("SPOOL_ALLOW_PARTIAL") {
        config.device.allow_partial_final_batch = parse_flag(&value);
    }
    if let Ok(value) = env::var("SPOOL_SEED") {
        if let Ok(seed) = value.parse::<u64>() {
            config.system.seed = seed;
        }
    }
    if let Ok(value) = env::var("SPOOL_LOG_LEVEL") {
        config.system.log_level = value;
    }
    if let Ok(value) = env::var("SPOOL_ALIGNMENT") {
        if let Ok(alignment) = value.parse::<usize>() {
            config.sequence.alignment = alignment;
        }
    }
    Ok(())
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"device_capacity": "64M", "seed": "7"}`)
pub fn apply_cli_overrides(
    config: &mut SpoolConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    if let Some(value) = cli_args.get("host_capacity") {
        config.host.capacity = value.parse::<ByteSize>()?;
    }
    if let Some(value) = cli_args.get("device_capacity") {
        config.device.capacity = value.parse::<ByteSize>()?;
    }
    if let Some(value) = cli_args.get("shuffle") {
        let shuffle = parse_flag(value);
        config.host.shuffle = shuffle;
        config.device.shuffle = shuffle;
    }
    if let Some(value) = cli_args.get("allow_partial") {
        config.device.allow_partial_final_batch = parse_flag(value);
    }
    if let Some(value) = cli_args.get("seed") {
        if let Ok(seed) = value.parse::<u64>() {
            config.system.seed = seed;
        }
    }
    if let Some(value) = cli_args.get("log_level") {
        config.system.log_level = value.clone();
    }
    if let Some(value) = cli_args.get("alignment") {
        if let Ok(alignment) = value.parse::<usize>() {
            config.sequence.alignment = alignment;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const OVERRIDE_VARS: &[&str] = &[
        "SPOOL_HOST_CAPACITY",
        "SPOOL_DEVICE_CAPACITY",
        "SPOOL_SHUFFLE",
        "SPOOL_ALLOW_PARTIAL",
        "SPOOL_SEED",
        "SPOOL_LOG_LEVEL",
        "SPOOL_ALIGNMENT",
    ];

    fn clear_override_vars() {
        for var in OVERRIDE_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("SPOOL_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("SPOOL_CONFIG_PATH");

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("SPOOL_CONFIG_PATH", "/definitely/not/here/spool.toml");
        let result = find_config_file();
        env::remove_var("SPOOL_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_override_vars();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[host]").unwrap();
        writeln!(file, "capacity = \"4M\"").unwrap();
        writeln!(file, "shuffle = true").unwrap();
        writeln!(file, "[[modalities]]").unwrap();
        writeln!(file, "name = \"features\"").unwrap();
        writeln!(file, "row_width = 40").unwrap();
        writeln!(file, "files = [\"feats.bin\"]").unwrap();
        writeln!(file, "left_window = 2").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.host.capacity, ByteSize::mebibytes(4));
        assert!(config.host.shuffle);
        assert_eq!(config.modalities.len(), 1);
        assert_eq!(config.modalities[0].window_size(), 3);
        assert_eq!(config.modalities[0].files[0], dir.path().join("feats.bin"));
    }

    #[test]
    fn test_load_invalid_toml() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[host").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = SpoolConfig::default();

        env::set_var("SPOOL_DEVICE_CAPACITY", "64M");
        env::set_var("SPOOL_SHUFFLE", "yes");
        env::set_var("SPOOL_SEED", "99");

        let result = apply_environment_overrides(&mut config);
        clear_override_vars();

        assert!(result.is_ok());
        assert_eq!(config.device.capacity, ByteSize::mebibytes(64));
        assert!(config.host.shuffle);
        assert!(config.device.shuffle);
        assert_eq!(config.system.seed, 99);
    }

    #[test]
    fn test_environment_override_bad_capacity() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = SpoolConfig::default();

        env::set_var("SPOOL_HOST_CAPACITY", "lots");
        let result = apply_environment_overrides(&mut config);
        clear_override_vars();

        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = SpoolConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("host_capacity".to_string(), "1K".to_string());
        cli_args.insert("alignment".to_string(), "8".to_string());
        cli_args.insert("allow_partial".to_string(), "true".to_string());

        apply_cli_overrides(&mut config, &cli_args).unwrap();

        assert_eq!(config.host.capacity, ByteSize(1024));
        assert_eq!(config.sequence.alignment, 8);
        assert!(config.device.allow_partial_final_batch);
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_override_vars();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[system]").unwrap();
        writeln!(file, "seed = 1").unwrap();
        writeln!(file, "log_level = \"warn\"").unwrap();

        env::set_var("SPOOL_SEED", "2");
        env::set_var("SPOOL_LOG_LEVEL", "debug");

        let mut cli_args = HashMap::new();
        cli_args.insert("seed".to_string(), "3".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();
        clear_override_vars();

        // CLI wins for seed, env wins for log level (no CLI override)
        assert_eq!(config.system.seed, 3);
        assert_eq!(config.system.log_level, "debug");
    }
}
