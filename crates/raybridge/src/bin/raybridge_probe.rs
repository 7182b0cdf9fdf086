//! # RAYBRIDGE Probe
//!
//! Synthetic producer: uploads a cube, draws a row of spinning instances
//! and logs the submit-to-present time of every frame.
//!
//! ```bash
//! raybridge_probe --frames 600 --instances 16
//! RUST_LOG=debug raybridge_probe            # per-frame round trips
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use raybridge::{logging, probe, AppError, AppResult, BridgeConfig, ProbeOptions, CONFIG_FILE_NAME};
use tracing::{error, info};

const USAGE: &str =
    "usage: raybridge_probe [--frames N] [--instances N] [--force] [--config PATH]";

struct Args {
    config: PathBuf,
    options: ProbeOptions,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> AppResult<Args> {
    let mut parsed = Args {
        config: PathBuf::from(CONFIG_FILE_NAME),
        options: ProbeOptions::default(),
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--force" => parsed.options.force = true,
            "--frames" => parsed.options.frames = number(&arg, args.next())?,
            "--instances" => {
                let count = number(&arg, args.next())?;
                parsed.options.instances = u32::try_from(count)
                    .map_err(|_| AppError::Usage(format!("{arg} is too large")))?;
            }
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| AppError::Usage(format!("{arg} needs a path\n{USAGE}")))?;
                parsed.config = PathBuf::from(path);
            }
            "--help" | "-h" => return Err(AppError::Usage(USAGE.to_string())),
            other => return Err(AppError::Usage(format!("unknown argument {other}\n{USAGE}"))),
        }
    }
    Ok(parsed)
}

fn number(flag: &str, value: Option<String>) -> AppResult<u64> {
    value
        .as_deref()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::Usage(format!("{flag} needs a number\n{USAGE}")))
}

fn run() -> AppResult<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let config = BridgeConfig::load(&args.config)?;
    logging::init(&config.logging)?;

    info!(
        frames = args.options.frames,
        instances = args.options.instances,
        "raybridge_probe starting"
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    let summary = probe::run(&config, &args.options, &shutdown)?;
    info!(
        frames = summary.frames,
        mean_round_trip = ?summary.mean_round_trip,
        continuation_chunks = summary.channel.continuation_chunks,
        "raybridge_probe finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::Usage(message)) => {
            eprintln!("{message}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "fatal");
            eprintln!("raybridge_probe: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
