//! Cosechador: command-line runner for the Cosecha report catalog
//!
//! Loads configuration, logs in once, runs the built-in reports in order,
//! saves their artifacts and sends a summary.

#![warn(missing_docs)]

pub mod catalog;
mod commands;
mod config;
mod error;
pub mod logging;
pub mod notify;
mod output;
pub mod runner;

pub use catalog::{CatalogEntry, Source, CATALOG};
pub use commands::{CheckArgs, Cli, Commands, ListArgs, RunArgs};
pub use config::{AppConfig, NotifyConfig};
pub use error::{CliError, CliResult};
pub use logging::LogFormat;
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use output::{render_catalog, render_settings, CatalogRow, ProgressReporter};
pub use runner::{JobRecord, RunSummary};
