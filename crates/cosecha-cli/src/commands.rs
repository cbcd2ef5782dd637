//! CLI command definitions using clap

use crate::logging::LogFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cosechador: harvests business reports from web applications without an API
#[derive(Parser, Debug)]
#[command(name = "cosechador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// YAML configuration file
    #[arg(short, long, global = true, env = "COSECHA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Format of the log stream on stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in once and run the catalog reports in order
    Run(RunArgs),

    /// List the built-in reports
    List(ListArgs),

    /// Validate the configuration and show the effective values
    Check(CheckArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Report to run (repeatable; default: all)
    #[arg(short, long = "report", value_name = "NAME")]
    pub reports: Vec<String>,

    /// Show the browser window
    #[arg(long)]
    pub show_browser: bool,

    /// Launch the browser without its sandbox (containers)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Output directory for artifacts
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Give up on every wait after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,
}

/// Arguments for the list command
#[derive(Parser, Debug, Default)]
pub struct ListArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the check command
#[derive(Parser, Debug, Default)]
pub struct CheckArgs {
    /// Only require what these reports need (repeatable; default: all)
    #[arg(short, long = "report", value_name = "NAME")]
    pub reports: Vec<String>,
}
