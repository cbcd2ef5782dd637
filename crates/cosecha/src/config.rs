//! Session configuration.
//!
//! Everything a [`Session`](crate::session::Session) needs is passed in
//! explicitly. Nothing is read from the process environment here.

use crate::result::{CosechaError, CosechaResult};
use crate::retry::{millis, RetryPolicy};
use crate::wait::WaitOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Login credentials. `Debug` never prints the password.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Visible labels of the login screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    /// Label of the user field
    pub user_label: String,
    /// Label of the password field
    pub password_label: String,
    /// Name of the submit button
    pub submit: String,
    /// Link that leads back home when login lands on an error page
    pub recovery_link: String,
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            user_label: "Usuario".to_string(),
            password_label: "Contraseña".to_string(),
            submit: "INICIAR SESIÓN".to_string(),
            recovery_link: "Ir a Inicio".to_string(),
        }
    }
}

/// Every timing knob used by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Page navigation
    #[serde(with = "millis")]
    pub navigation: Duration,
    /// Network-idle readiness after navigation
    #[serde(with = "millis")]
    pub ready: Duration,
    /// Generic poll interval
    #[serde(with = "millis")]
    pub poll: Duration,
    /// Single lookup strategy
    #[serde(with = "millis")]
    pub strategy: Duration,
    /// Waiting for a `<select>` to accept an option
    #[serde(with = "millis")]
    pub select: Duration,
    /// Interval between option selection attempts
    #[serde(with = "millis")]
    pub select_poll: Duration,
    /// Delay between typed characters
    #[serde(with = "millis")]
    pub typing_delay: Duration,
    /// Pause after each typed field
    #[serde(with = "millis")]
    pub field_pause: Duration,
    /// Loading indicator appearance
    #[serde(with = "millis")]
    pub indicator_appear: Duration,
    /// Loading indicator removal
    #[serde(with = "millis")]
    pub indicator_detach: Duration,
    /// A qualifying table to be rendered
    #[serde(with = "millis")]
    pub table: Duration,
    /// Interval between table scans
    #[serde(with = "millis")]
    pub table_poll: Duration,
    /// Report controls such as the export button to appear
    #[serde(with = "millis")]
    pub controls: Duration,
    /// Pause after opening a menu
    #[serde(with = "millis")]
    pub menu_pause: Duration,
    /// A download to start
    #[serde(with = "millis")]
    pub download_appear: Duration,
    /// A download to stop growing
    #[serde(with = "millis")]
    pub stabilize: Duration,
    /// Interval between download size readings
    #[serde(with = "millis")]
    pub stabilize_poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(120),
            ready: Duration::from_secs(30),
            poll: Duration::from_millis(250),
            strategy: Duration::from_secs(10),
            select: Duration::from_secs(20),
            select_poll: Duration::from_secs(1),
            typing_delay: Duration::from_millis(50),
            field_pause: Duration::from_millis(300),
            indicator_appear: Duration::from_secs(10),
            indicator_detach: Duration::from_secs(120),
            table: Duration::from_secs(120),
            table_poll: Duration::from_secs(1),
            controls: Duration::from_secs(120),
            menu_pause: Duration::from_secs(1),
            download_appear: Duration::from_secs(60),
            stabilize: Duration::from_secs(900),
            stabilize_poll: Duration::from_secs(15),
        }
    }
}

impl Timeouts {
    /// Wait options with `timeout` and the generic poll interval
    #[must_use]
    pub const fn wait(&self, timeout: Duration) -> WaitOptions {
        WaitOptions::from_durations(timeout, self.poll)
    }

    /// Wait options for download stabilization
    #[must_use]
    pub const fn stabilization(&self) -> WaitOptions {
        WaitOptions::from_durations(self.stabilize, self.stabilize_poll)
    }

    /// Every timing scaled down to at most `cap`; handy for tests
    #[must_use]
    pub fn capped(mut self, cap: Duration) -> Self {
        for d in [
            &mut self.navigation,
            &mut self.ready,
            &mut self.poll,
            &mut self.strategy,
            &mut self.select,
            &mut self.select_poll,
            &mut self.typing_delay,
            &mut self.field_pause,
            &mut self.indicator_appear,
            &mut self.indicator_detach,
            &mut self.table,
            &mut self.table_poll,
            &mut self.controls,
            &mut self.menu_pause,
            &mut self.download_appear,
            &mut self.stabilize,
            &mut self.stabilize_poll,
        ] {
            *d = (*d).min(cap);
        }
        self
    }
}

/// Configuration of one automation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Login page
    pub login_url: String,
    /// Account used to log in
    pub credentials: Credentials,
    /// Login screen labels
    #[serde(default)]
    pub login_form: LoginForm,
    /// Where finished artifacts are written
    pub output_dir: PathBuf,
    /// Where the browser drops downloads before they are moved
    pub download_dir: PathBuf,
    /// Run the browser without a window
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Timings
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Per-job retries
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Retries for best-effort artifact normalization
    #[serde(default = "default_normalize_retry")]
    pub normalize_retry: RetryPolicy,
    /// Overall run budget in seconds; no wait continues past it
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

const fn default_headless() -> bool {
    true
}

fn default_normalize_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_secs(10))
}

impl SessionConfig {
    /// Configuration with default timings and retries
    #[must_use]
    pub fn new(
        login_url: impl Into<String>,
        credentials: Credentials,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let output_dir = output_dir.into();
        Self {
            login_url: login_url.into(),
            credentials,
            login_form: LoginForm::default(),
            download_dir: output_dir.join(".downloads"),
            output_dir,
            headless: default_headless(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            normalize_retry: default_normalize_retry(),
            deadline_secs: None,
        }
    }

    /// Set the timings
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the per-job retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the download directory
    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Bound the whole run
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_secs = Some(deadline.as_secs());
        self
    }

    /// Run budget, if any
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Check that required values are present
    pub fn validate(&self) -> CosechaResult<()> {
        let mut missing = Vec::new();
        if self.login_url.trim().is_empty() {
            missing.push("login_url");
        }
        if self.credentials.username.is_empty() {
            missing.push("credentials.username");
        }
        if self.credentials.password.is_empty() {
            missing.push("credentials.password");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CosechaError::config(format!(
                "missing values: {}",
                missing.join(", ")
            )))
        }
    }
}
