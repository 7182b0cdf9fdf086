//! # RAYBRIDGE Host
//!
//! The ray-tracing consumer.
//!
//! ```bash
//! raybridge_host --headless                 # run until the producer goes idle
//! raybridge_host --headless --frames 600    # stop after 600 frames
//! raybridge_host --headless --force         # clear leftovers when the host owns the names
//! ```
//!
//! Exit codes: 0 success, 1 runtime failure, 2 usage, 3 configuration,
//! 4 named objects.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use raybridge::{host, logging, AppError, AppResult, BridgeConfig, HostOptions, CONFIG_FILE_NAME};
use tracing::{error, info};

const USAGE: &str = "usage: raybridge_host [--headless] [--frames N] [--idle-timeout-ms MS] [--force] [--config PATH]";

struct Args {
    config: PathBuf,
    options: HostOptions,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> AppResult<Args> {
    let mut parsed = Args {
        config: PathBuf::from(CONFIG_FILE_NAME),
        options: HostOptions::default(),
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--headless" => parsed.options.headless = true,
            "--force" => parsed.options.force = true,
            "--frames" => parsed.options.frames = Some(number(&arg, args.next())?),
            "--idle-timeout-ms" => {
                parsed.options.idle_timeout =
                    Some(Duration::from_millis(number(&arg, args.next())?));
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
        config = %args.config.display(),
        owner = ?config.channel.owner,
        headless = args.options.headless,
        "raybridge_host starting"
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    let summary = host::run(&config, &args.options, &shutdown)?;
    info!(
        frames = summary.frames,
        blas_built = summary.last_frame.blas_built,
        instances = summary.last_frame.instances_emitted,
        "raybridge_host finished"
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
            eprintln!("raybridge_host: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
