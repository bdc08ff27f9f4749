// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # spool-observability
//!
//! Logging setup shared by every Spool binary and test harness.
//!
//! Provides consistent observability patterns across all Spool crates with
//! per-crate debug flag support.
//!
//! ## Features
//! - `file-logging`: timestamped run directories with rolling per-crate log files

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

// Re-export commonly used items
pub use cli::*;
pub use config::*;
pub use init::*;

/// Known Spool crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "spool",
    "spool-cache",
    "spool-config",
    "spool-device",
];
