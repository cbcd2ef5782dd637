//! Terminal output and progress reporting

use crate::catalog::CatalogEntry;
use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

/// Progress reporter for a report run
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
        }
    }

    /// Start a progress bar over `total` reports
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(200));
        pb.set_message(message.to_string());
        self.progress_bar = Some(pb);
    }

    /// Increment progress
    pub fn increment(&self, delta: u64) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(delta);
        }
    }

    /// Update progress message
    pub fn set_message(&self, message: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.set_message(message.to_string());
        }
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_and_clear();
        }
    }

    fn line(&self, symbol: &str, plain: &str, paint: fn(&str) -> String, message: &str) {
        let prefix = if self.use_color {
            paint(symbol)
        } else {
            plain.to_string()
        };
        let text = format!("{prefix} {message}");
        match self.progress_bar {
            Some(ref pb) if !pb.is_finished() => pb.println(text),
            _ => {
                let _ = self.term.write_line(&text);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("✓", "OK", |s| style(s).green().bold().to_string(), message);
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Always print failures, even in quiet mode
        self.line("✗", "FAIL", |s| style(s).red().bold().to_string(), message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("⚠", "WARN", |s| style(s).yellow().bold().to_string(), message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line("ℹ", "INFO", |s| style(s).blue().bold().to_string(), message);
    }

    /// Print the run totals
    pub fn summary(&self, ok: usize, failed: usize, skipped: usize, duration: Duration) {
        if self.quiet && failed == 0 {
            return;
        }

        let _ = self.term.write_line("");
        let total = ok + failed + skipped;
        let secs = duration.as_secs_f64();

        if self.use_color {
            let ok_style = Style::new().green().bold();
            let failed_style = Style::new().red().bold();
            let status = if failed > 0 {
                failed_style.apply_to("FAILED")
            } else {
                ok_style.apply_to("DONE")
            };
            let _ = self.term.write_line(&format!(
                "{status} {total} reports in {secs:.1}s ({} ok, {} failed, {skipped} skipped)",
                ok_style.apply_to(ok),
                if failed > 0 {
                    failed_style.apply_to(failed).to_string()
                } else {
                    failed.to_string()
                },
            ));
        } else {
            let status = if failed > 0 { "FAILED" } else { "DONE" };
            let _ = self.term.write_line(&format!(
                "{status} {total} reports in {secs:.1}s ({ok} ok, {failed} failed, {skipped} skipped)"
            ));
        }
    }
}

/// Row of `cosechador list --json`
#[derive(Debug, Serialize)]
pub struct CatalogRow {
    /// Report name
    pub name: &'static str,
    /// "table" or "download"
    pub output: &'static str,
    /// Environment variable of the start page
    pub url_from: &'static str,
    /// Description
    pub description: &'static str,
}

impl From<&CatalogEntry> for CatalogRow {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            name: entry.name,
            output: entry.output_kind(),
            url_from: entry.source.env_var(),
            description: entry.description,
        }
    }
}

/// Aligned text listing of `entries`
#[must_use]
pub fn render_catalog(entries: &[CatalogEntry], use_color: bool) -> String {
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for entry in entries {
        let name = format!("{:width$}", entry.name);
        let name = if use_color {
            style(name).bold().to_string()
        } else {
            name
        };
        let _ = writeln!(
            out,
            "{name}  {:8}  {}",
            entry.output_kind(),
            entry.description
        );
    }
    out
}

/// Aligned `key: value` block
#[must_use]
pub fn render_settings(values: &[(&str, String)]) -> String {
    let width = values.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    values.iter().fold(String::new(), |mut out, (key, value)| {
        let _ = writeln!(out, "{key:width$}  {value}");
        out
    })
}
