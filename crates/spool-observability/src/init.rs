// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for Spool
//!
//! Console logging is always available. With the `file-logging` feature, logs are also
//! written to a timestamped run folder with per-crate files and configurable retention.

use anyhow::{anyhow, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer {
    match format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Initialize console-only logging
///
/// The base level comes from `config.level`; crates named in `debug_flags` are raised to
/// `debug`. `RUST_LOG`, when set, replaces the computed filter entirely.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_console_logging(debug_flags: &CrateDebugFlags, config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(debug_flags.to_filter_string(&config.level)),
    };

    Registry::default()
        .with(vec![console_layer(config.format, filter)])
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(feature = "file-logging")]
pub use file::{init_logging, LoggingGuard};

#[cfg(feature = "file-logging")]
mod file {
    use super::*;
    use anyhow::Context;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use std::path::{Path, PathBuf};
    use tracing_appender::rolling;

    /// Logging initialization result
    pub struct LoggingGuard {
        _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
        log_dir: PathBuf,
    }

    impl LoggingGuard {
        /// Get the log directory path
        pub fn log_dir(&self) -> &Path {
            &self.log_dir
        }
    }

    /// Initialize logging with file output and console output
    ///
    /// Creates a timestamped folder structure:
    /// ```text
    /// ./logs/
    ///   └── run_20250101_120000/
    ///       ├── spool-cache.log
    ///       ├── spool-device.log
    ///       └── spool.log (combined)
    /// ```
    pub fn init_logging(
        debug_flags: &CrateDebugFlags,
        config: &LoggingConfig,
    ) -> Result<LoggingGuard> {
        let base_log_dir = config
            .log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./logs"));

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let run_folder = base_log_dir.join(format!("run_{}", timestamp));
        std::fs::create_dir_all(&run_folder).with_context(|| {
            format!("Failed to create log directory: {}", run_folder.display())
        })?;

        cleanup_old_logs(&base_log_dir, config.retention_days, config.retention_runs)?;

        let filter = debug_flags.to_filter_string(&config.level);
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut file_guards = Vec::new();

        layers.push(console_layer(config.format, EnvFilter::new(&filter)));

        // One file per crate
        for crate_name in crate::KNOWN_CRATES {
            let file_appender = rolling::daily(&run_folder, format!("{}.log", crate_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            file_guards.push(guard);

            let target = crate_name.replace('-', "_");
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(EnvFilter::new(format!("{}=debug,off", target)))
                .boxed();
            layers.push(file_layer);
        }

        // Combined log file (all crates)
        let combined_appender = rolling::daily(&run_folder, "spool.log");
        let (combined_non_blocking, combined_guard) =
            tracing_appender::non_blocking(combined_appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(combined_non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(EnvFilter::new(&filter))
                .boxed(),
        );
        file_guards.push(combined_guard);

        Registry::default()
            .with(layers)
            .try_init()
            .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

        Ok(LoggingGuard {
            _file_guards: file_guards,
            log_dir: run_folder,
        })
    }

    /// Clean up old log directories based on retention policy
    fn cleanup_old_logs(
        base_log_dir: &Path,
        retention_days: u64,
        retention_runs: usize,
    ) -> Result<()> {
        if !base_log_dir.exists() {
            return Ok(());
        }

        let cutoff_date = Utc::now() - chrono::Duration::days(retention_days as i64);
        let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();

        for entry in std::fs::read_dir(base_log_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(timestamp_str) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("run_"))
            else {
                continue;
            };
            if let Ok(naive) = NaiveDateTime::parse_from_str(timestamp_str, "%Y%m%d_%H%M%S") {
                runs.push((path, naive.and_utc()));
            }
        }

        // Oldest first
        runs.sort_by_key(|(_, dt)| *dt);

        let mut kept = Vec::new();
        for (path, dt) in runs {
            if dt < cutoff_date {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    tracing::warn!("Failed to remove old log directory {}: {}", path.display(), e);
                }
            } else {
                kept.push(path);
            }
        }

        if kept.len() > retention_runs {
            let to_remove = kept.len() - retention_runs;
            for path in kept.iter().take(to_remove) {
                if let Err(e) = std::fs::remove_dir_all(path) {
                    tracing::warn!("Failed to remove old log directory {}: {}", path.display(), e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_cleanly() {
        let flags = CrateDebugFlags::default();
        let config = LoggingConfig::with_level("warn");
        // Only one global subscriber may exist per process; whichever call loses must
        // report an error instead of panicking.
        let _first = init_console_logging(&flags, &config);
        let second = init_console_logging(&flags, &config);
        assert!(second.is_err());
    }
}
