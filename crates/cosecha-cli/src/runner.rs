//! Report run orchestration
//!
//! One login, then the selected catalog reports strictly in order. The first
//! report that exhausts its retries ends the run; the rest are skipped.

use crate::catalog::CatalogEntry;
use crate::config::AppConfig;
use crate::error::{CliError, CliResult};
use crate::notify;
use crate::output::ProgressReporter;
use cosecha::{
    run_job, write_grid, Artifact, CosechaResult, Grid, JobOutcome, PageDriver, RunOptions,
    Session,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Timestamp format of persisted table files
pub const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M";

/// A finished report and where its artifact ended up
#[derive(Debug)]
pub struct JobRecord {
    /// What the job produced
    pub outcome: JobOutcome,
    /// File written for the artifact
    pub saved: Option<PathBuf>,
}

impl JobRecord {
    /// One summary line
    #[must_use]
    pub fn line(&self) -> String {
        match (&self.saved, &self.outcome.result) {
            (Some(path), Ok(_)) => {
                let name = path
                    .file_name()
                    .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
                format!("{}: {name}", self.outcome.name)
            }
            _ => self.outcome.summary(),
        }
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct RunSummary {
    /// Start time, formatted with [`STAMP_FORMAT`]
    pub stamp: String,
    /// Reports that ran, in order
    pub records: Vec<JobRecord>,
    /// Reports never started because an earlier one failed
    pub skipped: Vec<&'static str>,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl RunSummary {
    /// Empty summary for a run started at `stamp`
    #[must_use]
    pub fn new(stamp: impl Into<String>) -> Self {
        Self {
            stamp: stamp.into(),
            records: Vec::new(),
            skipped: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Reports that produced an artifact
    #[must_use]
    pub fn ok_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }

    /// Reports that exhausted their retries
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.records.len() - self.ok_count()
    }

    /// Reports selected for the run
    #[must_use]
    pub fn total(&self) -> usize {
        self.records.len() + self.skipped.len()
    }

    /// Whether every selected report produced an artifact
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0 && self.skipped.is_empty()
    }

    /// Notification text
    #[must_use]
    pub fn message(&self) -> String {
        let headline = if self.is_success() {
            format!(
                "cosechador {}: {}/{} reports OK",
                self.stamp,
                self.ok_count(),
                self.total()
            )
        } else {
            format!(
                "cosechador {}: {} of {} reports FAILED",
                self.stamp,
                self.failed_count(),
                self.total()
            )
        };
        let mut lines = vec![headline];
        lines.extend(self.records.iter().map(|r| format!("- {}", r.line())));
        lines.extend(self.skipped.iter().map(|name| format!("- {name}: skipped")));
        lines.join("\n")
    }
}

/// Write `grid` as `<stem>_<stamp>.xlsx` under `dir`
pub fn persist_grid(grid: &Grid, dir: &Path, stem: &str, stamp: &str) -> CosechaResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{stem}_{stamp}.xlsx"));
    write_grid(grid, &path)?;
    tracing::info!(path = %path.display(), rows = grid.row_count(), "table saved");
    Ok(path)
}

fn record(mut outcome: JobOutcome, entry: &CatalogEntry, dir: &Path, stamp: &str) -> JobRecord {
    let persisted = match &outcome.result {
        Ok(Artifact::Grid(grid)) => Some(persist_grid(grid, dir, entry.file_stem, stamp)),
        _ => None,
    };
    let saved = match persisted {
        Some(Ok(path)) => Some(path),
        Some(Err(e)) => {
            tracing::error!(report = entry.name, error = %e, "could not save table");
            outcome.result = Err(e);
            None
        }
        None => match &outcome.result {
            Ok(Artifact::File(file)) => Some(file.path.clone()),
            _ => None,
        },
    };
    JobRecord { outcome, saved }
}

/// Log in through `session` and run `entries` in order
pub async fn run_catalog<D: PageDriver>(
    session: &Session<D>,
    app: &AppConfig,
    entries: &[&'static CatalogEntry],
    options: &RunOptions,
    reporter: &ProgressReporter,
) -> CliResult<RunSummary> {
    let started = Instant::now();
    let mut summary = RunSummary::new(chrono::Local::now().format(STAMP_FORMAT).to_string());

    session.prepare_downloads().await?;
    reporter.set_message("login");
    session.login().await?;

    for (index, entry) in entries.iter().enumerate() {
        reporter.set_message(entry.name);
        let report = entry.definition(app.source_url(entry.source));
        let outcome = run_job(session, &report, options).await;
        let record = record(outcome, entry, &app.output_dir, &summary.stamp);
        reporter.increment(1);

        let failed = !record.outcome.is_success();
        if failed {
            reporter.failure(&record.line());
        } else {
            reporter.success(&record.line());
        }
        summary.records.push(record);

        if failed {
            summary.skipped = entries[index + 1..].iter().map(|e| e.name).collect();
            if !summary.skipped.is_empty() {
                tracing::warn!(skipped = ?summary.skipped, "stopping after failed report");
            }
            break;
        }
    }

    summary.elapsed = started.elapsed();
    Ok(summary)
}

#[cfg(feature = "browser")]
async fn run_in_browser(
    app: &AppConfig,
    entries: &[&'static CatalogEntry],
    reporter: &ProgressReporter,
) -> CliResult<RunSummary> {
    use cosecha::{ChromiumDriver, XlsxNormalizer};
    use std::sync::Arc;

    let driver = ChromiumDriver::launch(&app.browser_config()).await?;
    let session = Session::new(driver, app.session_config());
    let options = RunOptions::today().with_normalizer(Arc::new(XlsxNormalizer));
    let result = run_catalog(&session, app, entries, &options, reporter).await;
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "browser did not close cleanly");
    }
    result
}

#[cfg(not(feature = "browser"))]
async fn run_in_browser(
    _app: &AppConfig,
    _entries: &[&'static CatalogEntry],
    _reporter: &ProgressReporter,
) -> CliResult<RunSummary> {
    Err(CliError::config(
        "cosechador was built without the `browser` feature",
    ))
}

/// Run `entries` in a fresh browser and send the summary
pub async fn execute(
    app: &AppConfig,
    entries: &[&'static CatalogEntry],
    reporter: &ProgressReporter,
) -> CliResult<RunSummary> {
    let notifier = notify::from_config(&app.notify);
    match run_in_browser(app, entries, reporter).await {
        Ok(summary) => {
            tracing::info!(
                ok = summary.ok_count(),
                failed = summary.failed_count(),
                skipped = summary.skipped.len(),
                "run finished"
            );
            notify::deliver(notifier.as_ref(), &summary.message()).await;
            Ok(summary)
        }
        Err(e) => {
            tracing::error!(error = %e, "run aborted");
            notify::deliver(notifier.as_ref(), &format!("cosechador: run aborted: {e}")).await;
            Err(e)
        }
    }
}

/// Error for a run in which some report failed
#[must_use]
pub fn failure_error(summary: &RunSummary) -> CliError {
    let failed: Vec<&str> = summary
        .records
        .iter()
        .filter(|r| !r.outcome.is_success())
        .map(|r| r.outcome.name.as_str())
        .collect();
    CliError::report(format!(
        "{} of {} reports did not complete ({})",
        failed.len() + summary.skipped.len(),
        summary.total(),
        failed.join(", ")
    ))
}
