//! Declarative report jobs.
//!
//! A [`ReportDefinition`] is data: where to go, which steps to take and what
//! to bring back. [`run_report`] interprets one attempt; [`run_job`] wraps it
//! in the retry orchestrator and records a [`JobOutcome`].

use crate::driver::PageDriver;
use crate::file_ops::{normalize_in_place, ArtifactNormalizer, NormalizeOutcome, StableFile};
use crate::locator::{Selector, Target};
use crate::result::{CosechaError, CosechaResult};
use crate::retry::{millis, run_with_retries};
use crate::session::{month_to_date, Session, DATE_FORMAT};
use crate::table::Grid;
use crate::wait::WaitStatus;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One step of a report flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Pick the report type in the page's first `<select>`
    SelectReportType {
        /// Visible option text
        option: String,
    },
    /// Type the first of the month and today into the date fields
    FillMonthToDate,
    /// Click a control
    Click {
        /// What to click
        target: Target,
    },
    /// Wait until a selector matches
    WaitForSelector {
        /// What must appear
        selector: Selector,
        /// How long to wait
        #[serde(with = "millis")]
        timeout: Duration,
    },
    /// Wait until the results table has enough rows
    WaitForRows {
        /// Minimum row count
        min: usize,
        /// How long to wait
        #[serde(with = "millis")]
        timeout: Duration,
        /// Whether running out of time fails the attempt
        #[serde(default)]
        fatal: bool,
    },
    /// Wait for a loading indicator to come and go
    WaitLoadingCycle {
        /// The indicator
        indicator: Selector,
    },
    /// Sleep
    Pause {
        /// How long
        #[serde(with = "millis")]
        duration: Duration,
    },
}

/// What a report produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    /// Scrape the best table from the page
    Table {
        /// Column the table must have
        #[serde(default)]
        required_column: Option<String>,
        /// How long to wait for it
        #[serde(with = "millis")]
        timeout: Duration,
    },
    /// Download a file through an export menu
    Download {
        /// Name under the output directory
        file_name: String,
        /// Tab to open first
        #[serde(default)]
        tab: Option<Target>,
        /// Control that opens the export menu
        export: Target,
        /// Menu entry that starts the download
        menu: Target,
        /// Rewrite the file as plain values afterwards
        #[serde(default)]
        normalize: bool,
    },
}

/// A complete report flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDefinition {
    /// Stable name, used for logs and file names
    pub name: String,
    /// Page the flow starts from
    pub url: String,
    /// Steps in order
    #[serde(default)]
    pub steps: Vec<Step>,
    /// What to bring back
    pub output: Output,
}

impl ReportDefinition {
    /// Create a definition with no steps
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>, output: Output) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            steps: Vec::new(),
            output,
        }
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

/// What a successful job produced
#[derive(Debug, Clone)]
pub enum Artifact {
    /// A scraped table
    Grid(Grid),
    /// A downloaded file
    File(StableFile),
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grid(grid) => write!(f, "table {grid}"),
            Self::File(file) => match file.path.file_name() {
                Some(name) => write!(f, "{}", name.to_string_lossy()),
                None => write!(f, "{}", file.path.display()),
            },
        }
    }
}

/// Result of one report job
#[derive(Debug)]
pub struct JobOutcome {
    /// Report name
    pub name: String,
    /// Attempts made
    pub attempts: u32,
    /// The artifact, or the error that exhausted the retries
    pub result: CosechaResult<Artifact>,
}

impl JobOutcome {
    /// Whether the job produced an artifact
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// One-line description for summaries
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.result {
            Ok(artifact) => format!("{}: {artifact}", self.name),
            Err(e) => format!("{}: FAILED ({e})", self.name),
        }
    }
}

/// Per-run inputs that are not part of the session
#[derive(Clone)]
pub struct RunOptions {
    /// Date the month-to-date range ends on
    pub today: NaiveDate,
    /// Normalizer for downloads that ask for it
    pub normalizer: Option<Arc<dyn ArtifactNormalizer>>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("today", &self.today)
            .field("normalizer", &self.normalizer.as_ref().map(|n| n.name()))
            .finish()
    }
}

impl RunOptions {
    /// Options for a run ending on `today`
    #[must_use]
    pub const fn new(today: NaiveDate) -> Self {
        Self {
            today,
            normalizer: None,
        }
    }

    /// Options for a run ending on the local date
    #[must_use]
    pub fn today() -> Self {
        Self::new(chrono::Local::now().date_naive())
    }

    /// Use `normalizer` for downloads
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Arc<dyn ArtifactNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }
}

async fn run_step<D: PageDriver>(
    session: &Session<D>,
    step: &Step,
    options: &RunOptions,
) -> CosechaResult<()> {
    match step {
        Step::SelectReportType { option } => session.select_option(option).await,
        Step::FillMonthToDate => {
            let (start, end) = month_to_date(options.today);
            session.fill_date_range(start, end, DATE_FORMAT).await
        }
        Step::Click { target } => session.click(target).await.map(|_| ()),
        Step::WaitForSelector { selector, timeout } => session.wait_for(selector, *timeout).await,
        Step::WaitForRows {
            min,
            timeout,
            fatal,
        } => {
            let result = session.wait_for_rows(*min, *timeout).await;
            if *fatal || result.status == WaitStatus::DeadlineExceeded {
                return result.into_result().map(|_| ());
            }
            if !result.is_ready() {
                tracing::warn!(min, "table rows did not show up, continuing");
            }
            Ok(())
        }
        Step::WaitLoadingCycle { indicator } => {
            session.wait_loading_cycle(indicator).await.map(|_| ())
        }
        Step::Pause { duration } => {
            tokio::time::sleep(*duration).await;
            Ok(())
        }
    }
}

/// Run one attempt of `report` from its start page
pub async fn run_report<D: PageDriver>(
    session: &Session<D>,
    report: &ReportDefinition,
    options: &RunOptions,
) -> CosechaResult<Artifact> {
    session.goto(&report.url).await?;
    for (index, step) in report.steps.iter().enumerate() {
        tracing::debug!(report = %report.name, index, ?step, "step");
        run_step(session, step, options).await?;
    }

    match &report.output {
        Output::Table {
            required_column,
            timeout,
        } => {
            let grid = session
                .await_grid(required_column.as_deref(), *timeout)
                .await?;
            tracing::info!(report = %report.name, rows = grid.row_count(), cols = grid.column_count(), "table extracted");
            Ok(Artifact::Grid(grid))
        }
        Output::Download {
            file_name,
            tab,
            export,
            menu,
            normalize,
        } => {
            if let Some(tab) = tab {
                session.click(tab).await?;
                tokio::time::sleep(session.config().timeouts.menu_pause * 2).await;
            }
            let dest = session.config().output_dir.join(file_name);
            let file = session.export_download(export, menu, &dest).await?;
            if *normalize {
                normalize_download(session, &file, options).await;
            }
            Ok(Artifact::File(file))
        }
    }
}

async fn normalize_download<D: PageDriver>(
    session: &Session<D>,
    file: &StableFile,
    options: &RunOptions,
) {
    let Some(normalizer) = options.normalizer.clone() else {
        tracing::debug!(path = %file.path.display(), "no normalizer configured");
        return;
    };
    let outcome =
        normalize_in_place(normalizer, &file.path, &session.config().normalize_retry).await;
    if let NormalizeOutcome::LeftUntouched { error } = outcome {
        tracing::warn!(path = %file.path.display(), %error, "kept download as received");
    }
}

/// Run `report` under the session's retry policy
pub async fn run_job<D: PageDriver>(
    session: &Session<D>,
    report: &ReportDefinition,
    options: &RunOptions,
) -> JobOutcome {
    let policy = session.config().retry;
    let result = run_with_retries(&policy, &report.name, move |_| async move {
        run_report(session, report, options).await
    })
    .await;

    match result {
        Ok(done) => JobOutcome {
            name: report.name.clone(),
            attempts: done.attempts,
            result: Ok(done.value),
        },
        Err(e) => {
            let attempts = match &e {
                CosechaError::Exhausted { attempts, .. } => *attempts,
                _ => policy.max_attempts,
            };
            JobOutcome {
                name: report.name.clone(),
                attempts,
                result: Err(e),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::{Credentials, SessionConfig};
    use crate::driver::{MockDriver, MockElement};
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use std::path::Path;

    const KPI_PAGE: &str = "<html><body>\
        <table><tr><th>Tecla</th><th>Accion</th></tr><tr><td>F1</td><td>Ayuda</td></tr>\
        <tr><td>F2</td><td>Buscar</td></tr></table>\
        <table><thead><tr><th colspan=\"2\">Meta</th></tr>\
        <tr><th>Sucursal</th><th>Porcentaje</th></tr></thead>\
        <tbody><tr><td>Centro</td><td>80</td></tr></tbody></table>\
        </body></html>";

    fn session(out: &Path, retry: RetryPolicy) -> (MockDriver, Session<MockDriver>) {
        let mock = MockDriver::new();
        let config = SessionConfig::new("https://gym.test/login", Credentials::new("a", "b"), out)
            .with_retry(retry);
        (mock.clone(), Session::new(mock, config))
    }

    fn kpi() -> ReportDefinition {
        ReportDefinition::new(
            "kpi-desempeno",
            "https://gym.test/kpis",
            Output::Table {
                required_column: Some("Sucursal".into()),
                timeout: Duration::from_secs(30),
            },
        )
        .step(Step::SelectReportType {
            option: "Desempeño".into(),
        })
        .step(Step::Click {
            target: Target::button("Generar"),
        })
    }

    fn today() -> RunOptions {
        RunOptions::new(NaiveDate::from_ymd_opt(2025, 11, 23).unwrap())
    }

    mod definition_tests {
        use super::*;

        #[test]
        fn test_yaml_definition() {
            let yaml = r#"
name: cargos-recurrentes
url: https://gym.test/reportes
steps:
  - step: select_report_type
    option: Reporte Cargos Recurrentes
  - step: fill_month_to_date
  - step: wait_for_rows
    min: 1
    timeout: 20000
  - step: pause
    duration: 5000
output:
  kind: download
  file_name: cargos_recurrentes.xlsx
  export: { label: Exportar, strategies: [{ by: role, role: button, name: Exportar, exact: false }] }
  menu: { label: Excel, strategies: [{ by: text, text: Excel, exact: false }] }
"#;
            let def: ReportDefinition = serde_yaml_ng::from_str(yaml).unwrap();
            assert_eq!(def.steps.len(), 4);
            assert_eq!(
                def.steps[2],
                Step::WaitForRows {
                    min: 1,
                    timeout: Duration::from_secs(20),
                    fatal: false
                }
            );
            match def.output {
                Output::Download {
                    normalize, tab, ..
                } => {
                    assert!(!normalize);
                    assert!(tab.is_none());
                }
                Output::Table { .. } => panic!("expected a download"),
            }
        }

        #[test]
        fn test_outcome_summary() {
            let ok = JobOutcome {
                name: "direccion".into(),
                attempts: 1,
                result: Ok(Artifact::Grid(Grid::new(None, vec![vec!["a".into(); 3]; 2]))),
            };
            assert_eq!(ok.summary(), "direccion: table 2x3");
            let failed = JobOutcome {
                name: "corte-caja".into(),
                attempts: 3,
                result: Err(CosechaError::page("boom")),
            };
            assert!(!failed.is_success());
            assert!(failed.summary().starts_with("corte-caja: FAILED"));
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_table_report() {
            let dir = tempfile::tempdir().unwrap();
            let (mock, session) = session(dir.path(), RetryPolicy::once());
            mock.push_eval_result(json!("ok"));
            mock.add_element(&Selector::role("button", "Generar"), MockElement::new("Generar"));
            mock.set_elements(&Selector::css("html"), vec![MockElement::html(KPI_PAGE)]);

            let artifact = run_report(&session, &kpi(), &today()).await.unwrap();
            let Artifact::Grid(grid) = artifact else {
                panic!("expected a grid");
            };
            // the larger shortcut legend loses to the required column
            assert_eq!(grid.headers().unwrap(), ["Sucursal", "Porcentaje"]);
            assert_eq!(mock.history()[0], "navigate:https://gym.test/kpis");
            assert!(mock.was_called("click:role=button[name=\"Generar\"]"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_job_retries_from_the_start_page() {
            let dir = tempfile::tempdir().unwrap();
            let (mock, session) =
                session(dir.path(), RetryPolicy::new(3, Duration::from_secs(5)));
            mock.fail_navigations(1);
            mock.push_eval_result(json!("ok"));
            mock.add_element(&Selector::role("button", "Generar"), MockElement::new("Generar"));
            mock.set_elements(&Selector::css("html"), vec![MockElement::html(KPI_PAGE)]);

            let outcome = run_job(&session, &kpi(), &today()).await;
            assert!(outcome.is_success());
            assert_eq!(outcome.attempts, 2);
            assert_eq!(mock.call_count("navigate:"), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_job_exhausted() {
            let dir = tempfile::tempdir().unwrap();
            let (mock, session) =
                session(dir.path(), RetryPolicy::new(2, Duration::from_secs(1)));
            mock.fail_navigations(5);

            let outcome = run_job(&session, &kpi(), &today()).await;
            assert_eq!(outcome.attempts, 2);
            let err = outcome.result.unwrap_err();
            assert!(err.is_exhausted());
            assert!(err.to_string().contains("kpi-desempeno"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_optional_rows_wait_does_not_fail() {
            let dir = tempfile::tempdir().unwrap();
            let (mock, session) = session(dir.path(), RetryPolicy::once());
            mock.set_elements(&Selector::css("html"), vec![MockElement::html(KPI_PAGE)]);
            let report = ReportDefinition::new(
                "direccion",
                "https://gym.test/direccion",
                Output::Table {
                    required_column: None,
                    timeout: Duration::from_secs(5),
                },
            )
            .step(Step::WaitForRows {
                min: 50,
                timeout: Duration::from_secs(2),
                fatal: false,
            });
            assert!(run_report(&session, &report, &today()).await.is_ok());

            let strict = ReportDefinition {
                steps: vec![Step::WaitForRows {
                    min: 50,
                    timeout: Duration::from_secs(2),
                    fatal: true,
                }],
                ..report
            };
            let err = run_report(&session, &strict, &today()).await.unwrap_err();
            assert!(err.is_timed_out());
        }

        #[tokio::test(start_paused = true)]
        async fn test_download_report_with_tab() {
            let dir = tempfile::tempdir().unwrap();
            let (mock, session) = session(dir.path(), RetryPolicy::once());
            session.prepare_downloads().await.unwrap();
            mock.push_eval_result(json!("ok"));
            mock.set_elements(
                &Selector::css("input[type='text']"),
                vec![MockElement::new(""), MockElement::new("")],
            );
            mock.add_element(&Selector::role("button", "Generar"), MockElement::new("Generar"));
            mock.add_element(&Selector::text("Membresía"), MockElement::new("Membresía"));
            mock.add_element(&Selector::role("button", "Exportar"), MockElement::new("Exportar"));
            mock.add_element(&Selector::text("Excel"), MockElement::new("Excel"));
            mock.download_on_click(&Selector::text("Excel").first(), "export.xlsx", b"bytes".to_vec());

            let report = ReportDefinition::new(
                "corte-caja",
                "https://gym.test/reportes",
                Output::Download {
                    file_name: "corte_caja.xlsx".into(),
                    tab: Some(Target::tab(&["Membresía", "Membresia"])),
                    export: Target::button("Exportar"),
                    menu: Target::menu_item("Excel"),
                    normalize: false,
                },
            )
            .step(Step::SelectReportType {
                option: "Reporte Corte De Caja".into(),
            })
            .step(Step::FillMonthToDate)
            .step(Step::Click {
                target: Target::button("Generar"),
            });

            let artifact = run_report(&session, &report, &today()).await.unwrap();
            assert_eq!(artifact.to_string(), "corte_caja.xlsx");
            assert_eq!(
                std::fs::read(dir.path().join("corte_caja.xlsx")).unwrap(),
                b"bytes"
            );
            let first_input = Selector::css("input[type='text']").nth(0);
            assert_eq!(mock.value_of(&first_input).unwrap(), "11/01/2025");
            assert!(mock.was_called("click:text=\"Membresía\" >> nth=0"));
        }
    }
}
