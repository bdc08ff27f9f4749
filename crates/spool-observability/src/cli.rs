// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-crate debug flags
//!
//! `--debug-spool-cache`, `--debug-spool-device`, ... raise one crate to `debug`;
//! `--debug-all` raises every crate in [`KNOWN_CRATES`].

use std::collections::BTreeSet;
use std::env;

use crate::KNOWN_CRATES;

/// Crates whose log level is raised to `debug`
///
/// # Example
/// ```rust
/// use spool_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-spool-cache".to_string()]);
/// assert!(flags.is_enabled("spool-cache"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrateDebugFlags {
    crates: BTreeSet<String>,
}

impl CrateDebugFlags {
    /// Collect `--debug-<crate>` and `--debug-all` from an argument list; anything else is
    /// left for the caller's own parser.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = Self::default();
        for arg in args {
            match arg.strip_prefix("--debug-") {
                Some("all") => flags.enable_all(),
                Some(name) if !name.is_empty() => flags.enable(name),
                _ => {}
            }
        }
        flags
    }

    /// Comma-separated crate names, or `all`
    pub fn from_list(list: &str) -> Self {
        let mut flags = Self::default();
        flags.extend_from_list(list);
        flags
    }

    fn extend_from_list(&mut self, list: &str) {
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == "all" {
                self.enable_all();
            } else {
                self.enable(name);
            }
        }
    }

    pub fn enable(&mut self, crate_name: &str) {
        self.crates.insert(crate_name.to_string());
    }

    pub fn enable_all(&mut self) {
        self.crates
            .extend(KNOWN_CRATES.iter().map(|name| name.to_string()));
    }

    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.crates.contains(crate_name)
    }

    /// Enabled crates, sorted
    pub fn enabled_crates(&self) -> impl Iterator<Item = &str> {
        self.crates.iter().map(String::as_str)
    }

    pub fn any_enabled(&self) -> bool {
        !self.crates.is_empty()
    }

    /// `DEBUG` for enabled crates, `INFO` otherwise
    pub fn log_level(&self, crate_name: &str) -> tracing::Level {
        if self.is_enabled(crate_name) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// `EnvFilter` directives: one `<target>=debug` per enabled crate, then `base_level`.
    ///
    /// Tracing targets are module paths, so `spool-cache` becomes `spool_cache`.
    pub fn to_filter_string(&self, base_level: &str) -> String {
        self.crates
            .iter()
            .map(|name| format!("{}=debug", name.replace('-', "_")))
            .chain(std::iter::once(base_level.to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Debug flags from the process arguments plus the `SPOOL_DEBUG` environment variable
/// (`SPOOL_DEBUG=spool-cache,spool-device` or `SPOOL_DEBUG=all`)
pub fn parse_debug_flags() -> CrateDebugFlags {
    let mut flags = CrateDebugFlags::from_args(env::args());
    if let Ok(list) = env::var("SPOOL_DEBUG") {
        flags.extend_from_list(&list);
    }
    flags
}

/// Help text for the debug flags
pub fn debug_flags_help() -> String {
    format!(
        r#"Debug Flags:
  --debug-all                    Enable debug logging for all crates
  --debug-{{crate-name}}          Enable debug logging for specific crate

Available crates:
  {}

Environment Variable:
  SPOOL_DEBUG={{crate-name}}[,{{crate-name}}]  Enable debug for crates (comma-separated)
  SPOOL_DEBUG=all                               Enable debug for all crates
"#,
        KNOWN_CRATES.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_crate_flag() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-spool-cache".to_string()]);
        assert!(flags.is_enabled("spool-cache"));
        assert!(!flags.is_enabled("spool-device"));
    }

    #[test]
    fn test_debug_all() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-all".to_string()]);
        for crate_name in KNOWN_CRATES {
            assert!(flags.is_enabled(crate_name), "{} should be enabled", crate_name);
        }
        assert_eq!(flags, CrateDebugFlags::from_list("all"));
    }

    #[test]
    fn test_non_flag_arguments_ignored() {
        let flags = CrateDebugFlags::from_args(vec![
            "--config".to_string(),
            "spool.toml".to_string(),
            "--debug-".to_string(),
        ]);
        assert!(!flags.any_enabled());
    }

    #[test]
    fn test_list_parsing() {
        let flags = CrateDebugFlags::from_list(" spool-device, ,spool-cache ");
        assert_eq!(
            flags.enabled_crates().collect::<Vec<_>>(),
            vec!["spool-cache", "spool-device"]
        );
    }

    #[test]
    fn test_filter_string_uses_module_targets() {
        let flags = CrateDebugFlags::from_args(vec![
            "--debug-spool-device".to_string(),
            "--debug-spool-cache".to_string(),
        ]);
        assert_eq!(
            flags.to_filter_string("warn"),
            "spool_cache=debug,spool_device=debug,warn"
        );
        assert_eq!(CrateDebugFlags::default().to_filter_string("info"), "info");
    }

    #[test]
    fn test_log_level() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-spool-cache".to_string()]);
        assert_eq!(flags.log_level("spool-cache"), tracing::Level::DEBUG);
        assert_eq!(flags.log_level("spool-config"), tracing::Level::INFO);
    }
}
