//! Cosecha: resilient browser interaction and table extraction
//!
//! Cosecha ("harvest") drives web applications that offer no API through
//! their human UI, then brings back either a downloaded file or the data
//! table rendered on the page. The target pages are slow and unstable, so
//! every interaction tolerates partial failure.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      COSECHA Architecture                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐  │
//! │  │ Retry        │──►│ Report job   │──►│ Session              │  │
//! │  │ orchestrator │   │ (steps)      │   │ resolver + poller    │  │
//! │  └──────────────┘   └──────────────┘   └──────────┬───────────┘  │
//! │                                                   │              │
//! │              ┌────────────────┬───────────────────┤              │
//! │              ▼                ▼                   ▼              │
//! │     ┌──────────────┐  ┌──────────────┐   ┌──────────────────┐    │
//! │     │ Table scorer │  │ Download     │   │ PageDriver       │    │
//! │     │ (best grid)  │  │ finalizer    │   │ (CDP or mock)    │    │
//! │     └──────────────┘  └──────────────┘   └──────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - `browser`: [`ChromiumDriver`], real Chromium control over CDP
//! - `xlsx` (default): spreadsheet persistence and [`XlsxNormalizer`]

#![warn(missing_docs)]

mod browser;
mod config;
mod driver;
#[cfg(feature = "xlsx")]
mod export;
mod file_ops;
mod locator;
mod report;
mod resolver;
mod result;
mod retry;
mod session;
mod table;
mod wait;

pub use browser::BrowserConfig;
#[cfg(feature = "browser")]
pub use browser::ChromiumDriver;
pub use config::{Credentials, LoginForm, SessionConfig, Timeouts};
pub use driver::{
    Interactable, LoadSnapshot, MockDriver, MockElement, PageDriver, LOAD_SNAPSHOT_JS,
};
#[cfg(feature = "xlsx")]
pub use export::{read_grid, write_grid, XlsxNormalizer, DEFAULT_SHEET};
pub use file_ops::{
    await_new_download, await_stable_file, finished_files, is_partial, move_file,
    normalize_in_place, remove_stale, replace_atomically, size_on_disk, temp_sibling,
    ArtifactNormalizer, DownloadHandle, DownloadState, NormalizeOutcome, StableFile,
    DEFAULT_STABLE_POLL, DEFAULT_STABLE_TIMEOUT, PARTIAL_EXTENSIONS,
};
pub use locator::{Selector, Target};
pub use report::{
    run_job, run_report, Artifact, JobOutcome, Output, ReportDefinition, RunOptions, Step,
};
pub use resolver::{ActionKind, Resolved, Resolver, StrategyAttempt, DEFAULT_ATTEMPT_TIMEOUT};
pub use result::{CosechaError, CosechaResult};
pub use retry::{
    run_with_retries, Retried, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY,
};
pub use session::{month_to_date, Session, DATE_FORMAT, RESULT_ROWS_CSS, TEXT_INPUTS_CSS};
pub use table::{extract_best, flatten_columns, CandidateSet, Grid};
pub use wait::{
    Deadline, LoadState, Poller, Transient, WaitOptions, WaitResult, WaitStatus,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS, MIN_POLL_INTERVAL_MS,
    NETWORK_IDLE_THRESHOLD_MS,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        run_job, run_report, run_with_retries, ActionKind, Artifact, CosechaError, CosechaResult,
        Credentials, Grid, JobOutcome, Output, PageDriver, Poller, ReportDefinition, Resolver,
        RetryPolicy, RunOptions, Selector, Session, SessionConfig, Step, Target, WaitOptions,
    };
}
