/*
 * This file is part of fscd.
 *
 * Copyright (C) 2025 fscd contributors
 *
 * fscd is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fscd is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fscd. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::{error, info, warn};

use fscd::config::{load_config, DEFAULT_CONFIG_PATH, DEFAULT_ZONE_DIR};
use fscd::logger::{self, DEFAULT_EVENT_LOG_PATH, DEFAULT_LOG_LEVEL, LOG_ENV_VAR};
use fscd::service::Fscd;

const VERSION: &str = env!("CARGO_PKG_VERSION");

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    log_level: Option<String>,
    config_path: PathBuf,
    zone_dir: PathBuf,
    once: bool,
    verbose: bool,
    event_log: Option<PathBuf>,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            log_level: None,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            zone_dir: PathBuf::from(DEFAULT_ZONE_DIR),
            once: false,
            verbose: false,
            event_log: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run(CliArgs),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "--once" => cli.once = true,
            "--verbose" => cli.verbose = true,
            "--logging" => cli.event_log = Some(PathBuf::from(DEFAULT_EVENT_LOG_PATH)),
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path argument")?;
                cli.config_path = PathBuf::from(path);
            }
            "-z" | "--zone-dir" => {
                i += 1;
                let path = args.get(i).ok_or("--zone-dir requires a path argument")?;
                cli.zone_dir = PathBuf::from(path);
            }
            arg if arg.starts_with('-') => return Err(format!("Unknown argument: {}", arg)),
            level => {
                if cli.log_level.is_some() {
                    return Err(format!("Unexpected argument: {}", level));
                }
                cli.log_level = Some(level.to_string());
            }
        }
        i += 1;
    }

    Ok(Command::Run(cli))
}

fn print_help() {
    eprintln!("fscd {} - Fan speed control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    fscd [LEVEL] [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH     Configuration file (default {})", DEFAULT_CONFIG_PATH);
    eprintln!("    -z, --zone-dir PATH   Directory of zone expression files (default {})", DEFAULT_ZONE_DIR);
    eprintln!("        --once            Run a single control cycle and exit");
    eprintln!("        --verbose         Log the evaluation trace of every zone");
    eprintln!("        --logging         Append events to {}", DEFAULT_EVENT_LOG_PATH);
    eprintln!("    -v, --version         Print version");
    eprintln!("    -h, --help            Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}              Log level (trace, debug, info, warn, error)", LOG_ENV_VAR);
}

fn print_version() {
    println!("fscd {}", VERSION);
}

fn run(cli: CliArgs) -> anyhow::Result<()> {
    if let Some(path) = &cli.event_log {
        if let Err(e) = logger::init_event_log(path) {
            warn!(path = %path.display(), error = %e, "STARTUP: Event journal unavailable");
        }
    }

    let config = load_config(&cli.config_path)
        .with_context(|| format!("loading {}", cli.config_path.display()))?;
    let mut fscd = Fscd::build(config, Path::new(&cli.zone_dir))
        .context("building zones from configuration")?;
    fscd.set_verbose(cli.verbose);
    fscd.start();

    ctrlc::set_handler(|| SHUTDOWN.store(true, Ordering::SeqCst))
        .context("installing signal handler")?;

    if cli.once {
        let pwms = fscd.run_cycle(fscd.sample_interval_secs());
        info!(?pwms, "CONTROL: Single cycle complete");
    } else {
        fscd.run(&SHUTDOWN);
    }

    fscd.shutdown();
    logger::close_event_log();
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Ok(Command::Run(cli)) => cli,
        Ok(Command::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            print_version();
            return ExitCode::SUCCESS;
        }
        Err(msg) => {
            eprintln!("Error: {}", msg);
            print_help();
            return ExitCode::FAILURE;
        }
    };

    let log_level = std::env::var(LOG_ENV_VAR)
        .ok()
        .or_else(|| cli.log_level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let journald = logger::init_tracing(&log_level);
    info!(version = VERSION, journald, "STARTUP: fscd starting");

    if unsafe { libc::geteuid() } != 0 {
        warn!("STARTUP: Not running as root, fan writes will likely fail");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("FATAL: {:#}", e);
            eprintln!("fscd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
