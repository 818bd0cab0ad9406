mod classify;
mod config;
mod convert;
mod data_dir;
mod dispatch;
mod logging;
mod signals;
mod stability;
mod status;
mod watcher;

use clap::Parser;
use config::{Backend, WatcherConfig};
use convert::{ConfiguredConverter, Converter};
use data_dir::DataDir;
use signals::Shutdown;
use status::{StatusFile, StatusTracker};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::level_filters::LevelFilter;
use watcher::Watcher;

/// Watch a directory for fully-copied timsTOF `.d` folders and convert each
/// one to mzML once its size has stopped changing.
#[derive(Parser, Debug)]
#[command(name = "tdfwatch", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "tdfwatch.toml")]
    config: PathBuf,

    /// Directory to watch (overrides config)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Output directory for mzML files (defaults to the watch directory)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Seconds between scans (overrides config)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Identical-size scans required before converting (overrides config)
    #[arg(long)]
    stability_checks: Option<u32>,

    /// Conversion backend (overrides config)
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Docker image providing tdf2mzml (overrides config)
    #[arg(long)]
    docker_image: Option<String>,

    /// Log file, appended to; `-` logs to stderr (default: conversion.log in the watch directory)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,

    /// Don't run conversions, only report what would be converted
    #[arg(long)]
    dry_run: bool,

    /// Run a single scan and exit
    #[arg(long)]
    once: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Print the running watcher's state and exit
    #[arg(long)]
    status: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut WatcherConfig) {
        if let Some(dir) = &self.dir {
            config.watch.dir = dir.clone();
        }
        if let Some(out) = &self.out {
            config.watch.out_dir = Some(out.clone());
        }
        if let Some(secs) = self.poll_interval {
            config.watch.poll_interval_secs = secs;
        }
        if let Some(n) = self.stability_checks {
            config.watch.stability_checks = n;
        }
        if let Some(backend) = self.backend {
            config.convert.backend = backend;
        }
        if let Some(image) = &self.docker_image {
            config.convert.docker_image = image.clone();
        }
        if let Some(file) = &self.log_file {
            config.log.file = Some(file.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if self.dry_run {
            config.convert.dry_run = true;
        }
    }
}

fn print_status(watch_dir: &std::path::Path) -> ExitCode {
    let file = StatusFile::new(DataDir::for_watch_dir(watch_dir).status());
    match file.read() {
        Ok(data) => {
            print!("{}", status::format_status(&data));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("No running watcher for {} ({e})", watch_dir.display());
            ExitCode::FAILURE
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    if cli.status {
        return print_status(&config.watch.dir);
    }

    if cli.print_config {
        match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{text}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("Error: failed to render config: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let log_destination = config.log.destination(&config.watch.dir);
    let level = logging::parse_level(&config.log.level).unwrap_or(LevelFilter::INFO);
    let _log_guard = match logging::init(level, log_destination.as_deref()) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };
    match &log_destination {
        Some(path) => tracing::info!(path = %path.display(), "logging to file"),
        None => tracing::info!("logging to stderr"),
    }
    tracing::debug!(?cli, "parsed CLI arguments");

    let out_dir = config.watch.out_dir().to_path_buf();
    if let Err(e) = std::fs::create_dir_all(&out_dir) {
        tracing::error!(error = %e, dir = %out_dir.display(), "cannot create output directory");
        eprintln!("Error: cannot create output directory {}: {e}", out_dir.display());
        return ExitCode::FAILURE;
    }

    let data_dir = DataDir::for_watch_dir(&config.watch.dir);
    if let Err(e) = data_dir.init() {
        eprintln!("Error: cannot create {}: {e}", data_dir.root().display());
        return ExitCode::FAILURE;
    }
    let _lock = match data_dir.acquire_lock() {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!(error = %e, "cannot start watcher");
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    if let Err(e) = signals::install(shutdown.clone()) {
        tracing::warn!(error = %e, "failed to install signal handlers");
    }

    let converter = ConfiguredConverter::from_config(&config.convert);
    if !converter.available() {
        tracing::warn!(
            backend = converter.name(),
            "conversion tool not found; conversions will fail until it is installed"
        );
    }

    let status = StatusTracker::new(
        data_dir.status(),
        &config.watch.dir,
        &out_dir,
        config.convert.dry_run,
    );
    let mut watcher = Watcher::new(&config, converter, shutdown).with_status(status);
    watcher.run(cli.once).await;

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "tdfwatch",
            "--dir",
            "/runs",
            "--out",
            "/mzml",
            "--poll-interval",
            "5",
            "--stability-checks",
            "3",
            "--backend",
            "local",
            "--dry-run",
            "--log-level",
            "DEBUG",
        ]);
        let mut config = WatcherConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.watch.dir, PathBuf::from("/runs"));
        assert_eq!(config.watch.out_dir(), std::path::Path::new("/mzml"));
        assert_eq!(config.watch.poll_interval_secs, 5);
        assert_eq!(config.watch.stability_checks, 3);
        assert_eq!(config.convert.backend, Backend::Local);
        assert!(config.convert.dry_run);
        assert_eq!(config.log.level, "DEBUG");
    }

    #[test]
    fn test_cli_without_flags_keeps_config() {
        let cli = Cli::parse_from(["tdfwatch"]);
        let mut config = WatcherConfig::default();
        config.watch.stability_checks = 7;
        config.convert.dry_run = true;
        cli.apply(&mut config);
        assert_eq!(config.watch.stability_checks, 7);
        assert!(config.convert.dry_run);
        assert_eq!(cli.config, PathBuf::from("tdfwatch.toml"));
    }
}
