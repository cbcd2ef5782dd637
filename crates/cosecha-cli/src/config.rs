//! Application configuration
//!
//! Values come from an optional YAML file, then the environment, then
//! command-line flags. Later sources win.

use crate::catalog::{CatalogEntry, Source};
use crate::commands::RunArgs;
use crate::error::{CliError, CliResult};
use cosecha::{BrowserConfig, Credentials, RetryPolicy, SessionConfig, Timeouts};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Webhook notification settings
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Send a summary after each run
    pub enabled: bool,
    /// Endpoint receiving the JSON payload
    pub url: Option<String>,
    /// Token forwarded in the payload
    pub token: Option<String>,
    /// Recipient
    pub to: Option<String>,
}

impl NotifyConfig {
    /// Names of the settings an enabled notifier still lacks
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("WA_URL", &self.url),
            ("WA_TOKEN", &self.token),
            ("WA_TO", &self.to),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
        .map(|(name, _)| name)
        .collect()
    }
}

impl fmt::Debug for NotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "********"))
            .field("to", &self.to)
            .finish()
    }
}

/// Everything a `cosechador` run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Account used to log in
    pub credentials: Credentials,
    /// Login page
    pub login_url: String,
    /// Page with the management summary table
    pub direccion_url: String,
    /// Report page with the export menus
    pub reportes_url: String,
    /// KPI page
    pub kpi_url: String,
    /// Where artifacts are written
    pub output_dir: PathBuf,
    /// Where the log file is appended, if anywhere
    pub log_dir: Option<PathBuf>,
    /// Show the browser window
    pub show_browser: bool,
    /// Chromium executable (None = auto-detect)
    pub chrome_path: Option<PathBuf>,
    /// Launch Chromium without its sandbox
    pub no_sandbox: bool,
    /// Overall run budget in seconds
    pub deadline_secs: Option<u64>,
    /// Page timings
    pub timeouts: Timeouts,
    /// Per-report retries
    pub retry: RetryPolicy,
    /// Run summary delivery
    pub notify: NotifyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            login_url: String::new(),
            direccion_url: String::new(),
            reportes_url: String::new(),
            kpi_url: String::new(),
            output_dir: PathBuf::from("data"),
            log_dir: None,
            show_browser: false,
            chrome_path: None,
            no_sandbox: false,
            deadline_secs: None,
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            notify: NotifyConfig::default(),
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl AppConfig {
    /// Load the YAML file at `path` (if any), then apply the process environment
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_yaml_ng::from_str(&text)?)
    }

    /// Override fields from environment variables. Empty values count as unset.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DIRECCION_USER") {
            self.credentials.username = v;
        }
        if let Some(v) = get("DIRECCION_PASS") {
            self.credentials.password = v;
        }
        if let Some(v) = get("DIRECCION_LOGIN_URL") {
            self.login_url = v;
        }
        if let Some(v) = get(Source::Direccion.env_var()) {
            self.direccion_url = v;
        }
        if let Some(v) = get(Source::Reportes.env_var()) {
            self.reportes_url = v;
        }
        if let Some(v) = get(Source::Kpis.env_var()) {
            self.kpi_url = v;
        }
        if let Some(v) = get("SHOW_BROWSER") {
            self.show_browser = flag(&v);
        }
        if let Some(v) = get("COSECHA_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("COSECHA_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CHROME_PATH") {
            self.chrome_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("WA_ENABLED") {
            self.notify.enabled = flag(&v);
        }
        if let Some(v) = get("WA_URL") {
            self.notify.url = Some(v);
        }
        if let Some(v) = get("WA_TOKEN") {
            self.notify.token = Some(v);
        }
        if let Some(v) = get("WA_TO") {
            self.notify.to = Some(v);
        }
    }

    /// Apply the flags of `cosechador run`
    pub fn apply_run_args(&mut self, args: &RunArgs) {
        if args.show_browser {
            self.show_browser = true;
        }
        if args.no_sandbox {
            self.no_sandbox = true;
        }
        if let Some(ref dir) = args.output {
            self.output_dir.clone_from(dir);
        }
        if let Some(secs) = args.deadline {
            self.deadline_secs = Some(secs);
        }
    }

    /// Start page for reports of `source`
    #[must_use]
    pub fn source_url(&self, source: Source) -> &str {
        match source {
            Source::Direccion => &self.direccion_url,
            Source::Reportes => &self.reportes_url,
            Source::Kpis => &self.kpi_url,
        }
    }

    /// Names of every required value that is unset for running `entries`
    #[must_use]
    pub fn missing(&self, entries: &[&CatalogEntry]) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.credentials.username.trim().is_empty() {
            missing.push("DIRECCION_USER");
        }
        if self.credentials.password.is_empty() {
            missing.push("DIRECCION_PASS");
        }
        if self.login_url.trim().is_empty() {
            missing.push("DIRECCION_LOGIN_URL");
        }
        for entry in entries {
            let name = entry.source.env_var();
            if self.source_url(entry.source).trim().is_empty() && !missing.contains(&name) {
                missing.push(name);
            }
        }
        missing
    }

    /// Check every required value at once, then create the output directories
    pub fn validate(&self, entries: &[&CatalogEntry]) -> CliResult<()> {
        let missing = self.missing(entries);
        if !missing.is_empty() {
            return Err(CliError::config(format!(
                "missing required values: {}",
                missing.join(", ")
            )));
        }
        std::fs::create_dir_all(&self.output_dir)?;
        if let Some(ref dir) = self.log_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Session configuration for the library
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::new(
            self.login_url.clone(),
            self.credentials.clone(),
            self.output_dir.clone(),
        )
        .with_timeouts(self.timeouts)
        .with_retry(self.retry)
        .with_headless(!self.show_browser);
        match self.deadline_secs {
            Some(secs) => config.with_deadline(Duration::from_secs(secs)),
            None => config,
        }
    }

    /// Browser launch configuration
    #[must_use]
    pub fn browser_config(&self) -> BrowserConfig {
        let mut config = BrowserConfig::default().with_headless(!self.show_browser);
        if let Some(ref path) = self.chrome_path {
            config = config.with_chromium_path(path.clone());
        }
        if self.no_sandbox {
            config = config.with_no_sandbox();
        }
        config
    }

    /// Effective values for display, secrets masked
    #[must_use]
    pub fn redacted(&self) -> Vec<(&'static str, String)> {
        fn show(value: &str) -> String {
            if value.trim().is_empty() {
                "(unset)".to_string()
            } else {
                value.to_string()
            }
        }
        fn secret(value: Option<&str>) -> String {
            match value {
                Some(v) if !v.is_empty() => "********".to_string(),
                _ => "(unset)".to_string(),
            }
        }

        let notify = if self.notify.enabled {
            format!("webhook {}", show(self.notify.url.as_deref().unwrap_or_default()))
        } else {
            "disabled".to_string()
        };
        vec![
            ("user", show(&self.credentials.username)),
            ("password", secret(Some(self.credentials.password.as_str()))),
            ("login_url", show(&self.login_url)),
            ("direccion_url", show(&self.direccion_url)),
            ("reportes_url", show(&self.reportes_url)),
            ("kpi_url", show(&self.kpi_url)),
            ("output_dir", self.output_dir.display().to_string()),
            (
                "log_dir",
                self.log_dir
                    .as_ref()
                    .map_or_else(|| "(none)".to_string(), |d| d.display().to_string()),
            ),
            ("browser", if self.show_browser { "visible" } else { "headless" }.to_string()),
            (
                "retry",
                format!(
                    "{} attempts, {}s apart",
                    self.retry.max_attempts,
                    self.retry.delay.as_secs()
                ),
            ),
            ("notify", notify),
            ("notify_token", secret(self.notify.token.as_deref())),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::{self, CATALOG};
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn full_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DIRECCION_USER", "ana"),
            ("DIRECCION_PASS", "s3cret"),
            ("DIRECCION_LOGIN_URL", "https://example.test/login"),
            ("DIRECCION_REPORTE_URL", "https://example.test/direccion"),
            ("REPORTES_URL", "https://example.test/reportes"),
            ("KPI_DESEMPENO_URL", "https://example.test/kpis"),
        ]
    }

    fn all_entries() -> Vec<&'static CatalogEntry> {
        CATALOG.iter().collect()
    }

    mod env_tests {
        use super::*;

        #[test]
        fn test_env_fills_everything() {
            let mut config = AppConfig::default();
            let mut pairs = full_env();
            pairs.extend([
                ("SHOW_BROWSER", "1"),
                ("COSECHA_OUTPUT_DIR", "/srv/out"),
                ("CHROME_PATH", "/usr/bin/chromium"),
                ("WA_ENABLED", "1"),
                ("WA_TO", "5215550000"),
            ]);
            config.apply_env(env(&pairs));

            assert_eq!(config.credentials, Credentials::new("ana", "s3cret"));
            assert_eq!(config.kpi_url, "https://example.test/kpis");
            assert!(config.show_browser);
            assert_eq!(config.output_dir, PathBuf::from("/srv/out"));
            assert_eq!(config.chrome_path, Some(PathBuf::from("/usr/bin/chromium")));
            assert!(config.notify.enabled);
            assert_eq!(config.notify.to.as_deref(), Some("5215550000"));
        }

        #[test]
        fn test_empty_values_are_unset() {
            let mut config = AppConfig::default();
            config.apply_env(env(&[("DIRECCION_USER", "  "), ("SHOW_BROWSER", "")]));
            assert!(config.credentials.username.is_empty());
            assert!(!config.show_browser);
        }

        #[test]
        fn test_show_browser_zero_stays_headless() {
            let mut config = AppConfig::default();
            config.apply_env(env(&[("SHOW_BROWSER", "0")]));
            assert!(!config.show_browser);
            assert!(config.session_config().headless);
            assert!(config.browser_config().headless);
        }

        #[test]
        fn test_env_overrides_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("cosecha.yaml");
            std::fs::write(
                &path,
                "login_url: https://file.test/login\nkpi_url: https://file.test/kpis\n",
            )
            .unwrap();
            let mut config = AppConfig::from_file(&path).unwrap();
            config.apply_env(env(&[("DIRECCION_LOGIN_URL", "https://env.test/login")]));
            assert_eq!(config.login_url, "https://env.test/login");
            assert_eq!(config.kpi_url, "https://file.test/kpis");
        }
    }

    mod file_tests {
        use super::*;

        #[test]
        fn test_yaml_with_nested_sections() {
            let yaml = "credentials:\n  username: ana\n  password: s3cret\n\
                        output_dir: /srv/out\n\
                        retry:\n  max_attempts: 5\n  delay: 2000\n\
                        timeouts:\n  table: 30000\n\
                        notify:\n  enabled: true\n  url: https://hook.test\n";
            let config: AppConfig = serde_yaml_ng::from_str(yaml).unwrap();
            assert_eq!(config.credentials.username, "ana");
            assert_eq!(config.retry, RetryPolicy::new(5, Duration::from_secs(2)));
            assert_eq!(config.timeouts.table, Duration::from_secs(30));
            assert_eq!(config.timeouts.select, Timeouts::default().select);
            assert_eq!(config.notify.url.as_deref(), Some("https://hook.test"));
        }

        #[test]
        fn test_missing_file_is_config_error() {
            let err = AppConfig::from_file(Path::new("/nonexistent/cosecha.yaml")).unwrap_err();
            assert!(matches!(err, CliError::Config { .. }));
            assert!(err.to_string().contains("/nonexistent/cosecha.yaml"));
        }

        #[test]
        fn test_malformed_file_is_config_error() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("bad.yaml");
            std::fs::write(&path, "retry: [1, 2").unwrap();
            let err = AppConfig::from_file(&path).unwrap_err();
            assert!(matches!(err, CliError::Config { .. }));
        }
    }

    mod validate_tests {
        use super::*;

        #[test]
        fn test_reports_every_missing_value() {
            let config = AppConfig::default();
            let err = config.validate(&all_entries()).unwrap_err().to_string();
            for name in [
                "DIRECCION_USER",
                "DIRECCION_PASS",
                "DIRECCION_LOGIN_URL",
                "DIRECCION_REPORTE_URL",
                "REPORTES_URL",
                "KPI_DESEMPENO_URL",
            ] {
                assert!(err.contains(name), "{name} missing from: {err}");
            }
        }

        #[test]
        fn test_only_selected_sources_are_required() {
            let mut config = AppConfig::default();
            config.apply_env(env(&full_env()[..3]));
            let kpis = vec![catalog::find("kpi-desempeno").unwrap()];
            assert_eq!(config.missing(&kpis), vec!["KPI_DESEMPENO_URL"]);
        }

        #[test]
        fn test_valid_config_creates_directories() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = AppConfig::default();
            config.apply_env(env(&full_env()));
            config.output_dir = dir.path().join("out");
            config.log_dir = Some(dir.path().join("logs"));
            config.validate(&all_entries()).unwrap();
            assert!(dir.path().join("out").is_dir());
            assert!(dir.path().join("logs").is_dir());
        }
    }

    mod display_tests {
        use super::*;

        #[test]
        fn test_redacted_masks_secrets() {
            let mut config = AppConfig::default();
            config.apply_env(env(&[
                ("DIRECCION_USER", "ana"),
                ("DIRECCION_PASS", "s3cret"),
                ("WA_ENABLED", "1"),
                ("WA_TOKEN", "tok-123"),
            ]));
            let rendered = format!("{:?} {:?}", config.redacted(), config);
            assert!(!rendered.contains("s3cret"));
            assert!(!rendered.contains("tok-123"));
            assert!(rendered.contains("ana"));
        }

        #[test]
        fn test_unset_values_are_marked() {
            let values = AppConfig::default().redacted();
            let login = values.iter().find(|(k, _)| *k == "login_url").unwrap();
            assert_eq!(login.1, "(unset)");
        }
    }

    mod conversion_tests {
        use super::*;

        #[test]
        fn test_session_config_carries_settings() {
            let mut config = AppConfig::default();
            config.apply_env(env(&full_env()));
            config.deadline_secs = Some(3600);
            config.retry = RetryPolicy::new(2, Duration::from_secs(1));
            let session = config.session_config();
            assert_eq!(session.login_url, "https://example.test/login");
            assert_eq!(session.deadline(), Some(Duration::from_secs(3600)));
            assert_eq!(session.retry.max_attempts, 2);
            assert_eq!(session.download_dir, PathBuf::from("data").join(".downloads"));
        }

        #[test]
        fn test_notify_missing_fields() {
            let notify = NotifyConfig {
                enabled: true,
                url: Some("https://hook.test".to_string()),
                token: Some(String::new()),
                to: None,
            };
            assert_eq!(notify.missing(), vec!["WA_TOKEN", "WA_TO"]);
        }
    }
}
