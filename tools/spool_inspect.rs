// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pipeline inspector.
//!
//! Loads a `spool.toml`, assembles the configured pipeline, streams a number of batches and
//! reports throughput together with the per-tier counters.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use anyhow::{Context, Result};
use spool::cache::TierStats;
use spool::config::{apply_cli_overrides, load_config, SpoolConfig};
use spool::observability::{
    debug_flags_help, init_console_logging, parse_debug_flags, LogFormat, LoggingConfig,
};
use spool::{Pipeline, SequencePipeline};
use tracing::info;

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: spool_inspect [--config <path>] [--batches <n>] [--batch-size <n>] \
         [--sequence] [--json] [--set key=value]...\n\n\
         Defaults:\n\
         - config: discovered spool.toml\n\
         - batches: 100\n\
         - batch-size: 256\n\n\
         {}",
        debug_flags_help()
    );
    process::exit(2);
}

struct Args {
    config: Option<PathBuf>,
    batches: usize,
    batch_size: usize,
    sequence: bool,
    json: bool,
    overrides: HashMap<String, String>,
}

fn parse_number(flag: &str, value: Option<String>) -> usize {
    let value = value.unwrap_or_else(|| usage_and_exit());
    value.parse().unwrap_or_else(|_| {
        eprintln!("{flag} expects a number, got '{value}'");
        usage_and_exit()
    })
}

fn parse_args() -> Args {
    let mut parsed = Args {
        config: None,
        batches: 100,
        batch_size: 256,
        sequence: false,
        json: false,
        overrides: HashMap::new(),
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                parsed.config = Some(PathBuf::from(v));
            }
            "--batches" => parsed.batches = parse_number("--batches", args.next()),
            "--batch-size" => parsed.batch_size = parse_number("--batch-size", args.next()),
            "--sequence" => parsed.sequence = true,
            "--json" => parsed.json = true,
            "--set" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                let Some((key, value)) = v.split_once('=') else {
                    eprintln!("--set expects key=value, got '{v}'");
                    usage_and_exit();
                };
                parsed.overrides.insert(key.to_string(), value.to_string());
            }
            "-h" | "--help" => usage_and_exit(),
            other if other.starts_with("--debug-") => {}
            other => {
                eprintln!("Unknown argument: {other}");
                usage_and_exit();
            }
        }
    }

    parsed
}

struct Report {
    batches: usize,
    samples: usize,
    epochs_seen: usize,
    host: TierStats,
    device: TierStats,
}

fn run_rows(config: &SpoolConfig, args: &Args) -> Result<Report> {
    let mut pipeline = Pipeline::from_config(config).context("Failed to assemble pipeline")?;
    let mut samples = 0;
    let mut epochs_seen = 0;
    for _ in 0..args.batches {
        let batch = pipeline.next_batch(args.batch_size)?;
        samples += batch.len();
        if batch.end_of_epoch() {
            epochs_seen += 1;
        }
    }
    let (host, device) = pipeline.stats();
    Ok(Report {
        batches: args.batches,
        samples,
        epochs_seen,
        host,
        device,
    })
}

fn run_sequence(config: &SpoolConfig, args: &Args) -> Result<Report> {
    let mut pipeline =
        SequencePipeline::from_config(config).context("Failed to assemble sequence pipeline")?;
    let mut samples = 0;
    let mut epochs_seen = 0;
    for _ in 0..args.batches {
        let batch = pipeline.next_batch(args.batch_size)?;
        samples += batch.len();
        if batch.end_of_epoch() {
            epochs_seen += 1;
        }
    }
    let (host, device) = pipeline.stats();
    Ok(Report {
        batches: args.batches,
        samples,
        epochs_seen,
        host,
        device,
    })
}

fn main() -> Result<()> {
    let args = parse_args();
    let mut config = load_config(args.config.as_deref(), None).context("Failed to load config")?;
    apply_cli_overrides(&mut config, &args.overrides)?;

    let logging = LoggingConfig {
        format: if args.json { LogFormat::Json } else { LogFormat::Text },
        ..LoggingConfig::with_level(config.system.log_level.clone())
    };
    init_console_logging(&parse_debug_flags(), &logging)?;

    let sequence = args.sequence || config.sequence.enabled;
    info!(
        modalities = config.modalities.len(),
        host_capacity = %config.host.capacity,
        device_capacity = %config.device.capacity,
        sequence,
        "Inspecting pipeline"
    );

    let start = Instant::now();
    let report = if sequence {
        run_sequence(&config, &args)?
    } else {
        run_rows(&config, &args)?
    };
    let elapsed = start.elapsed().as_secs_f64();

    println!("batches:      {}", report.batches);
    println!("samples:      {}", report.samples);
    println!("epoch ends:   {}", report.epochs_seen);
    println!("elapsed:      {:.3}s", elapsed);
    if elapsed > 0.0 {
        println!(
            "throughput:   {:.1} batches/s, {:.1} samples/s",
            report.batches as f64 / elapsed,
            report.samples as f64 / elapsed
        );
    }
    println!("host tier:    {}", report.host);
    println!("device tier:  {}", report.device);
    Ok(())
}
