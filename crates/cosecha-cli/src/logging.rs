//! Tracing subscriber setup

use crate::error::{CliError, CliResult};
use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Name of the log file written under the log directory
pub const LOG_FILE: &str = "cosechador.log";

/// Format of the stderr log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Filter directive for the given flags.
///
/// `None` means no flag was given, so `RUST_LOG` or the default applies.
#[must_use]
pub fn directive_for(verbose: u8, quiet: bool) -> Option<&'static str> {
    if quiet {
        return Some("cosecha=warn,cosechador=warn");
    }
    match verbose {
        0 => None,
        1 => Some("cosecha=debug,cosechador=debug"),
        _ => Some("cosecha=trace,cosechador=trace"),
    }
}

/// Default directive when neither flags nor `RUST_LOG` say otherwise
pub const DEFAULT_DIRECTIVE: &str = "cosecha=info,cosechador=info";

fn build_filter(verbose: u8, quiet: bool) -> EnvFilter {
    match directive_for(verbose, quiet) {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}

/// Path of the log file under `dir`
#[must_use]
pub fn log_file_path(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE)
}

/// Install the global subscriber: stderr in `format`, plus an appending
/// plain-text file when `log_dir` is set.
pub fn init(
    verbose: u8,
    quiet: bool,
    format: LogFormat,
    log_dir: Option<&Path>,
) -> CliResult<()> {
    let stderr_text = (format == LogFormat::Text)
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));
    let stderr_json = (format == LogFormat::Json)
        .then(|| fmt::layer().json().with_writer(std::io::stderr));

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file_path(dir))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(verbose, quiet))
        .with(stderr_text)
        .with(stderr_json)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::config(format!("logging already initialized: {e}")))
}
