//! One automation session: a page driver plus its configuration.
//!
//! [`Session`] exposes the building blocks report flows are made of. Each
//! step either succeeds, absorbs an expected hiccup with a log line, or
//! returns a typed error for the job to retry.

use crate::config::SessionConfig;
use crate::driver::PageDriver;
use crate::file_ops::{
    await_new_download, await_stable_file, finished_files, move_file, remove_stale, StableFile,
};
use crate::locator::{Selector, Target};
use crate::resolver::{ActionKind, Resolver};
use crate::result::{CosechaError, CosechaResult};
use crate::table::{self, Grid};
use crate::wait::{Deadline, LoadState, Poller, Transient, WaitOptions, WaitResult, WaitStatus};
use chrono::{Datelike, NaiveDate};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Date format typed into report date fields
pub const DATE_FORMAT: &str = "%m/%d/%Y";

/// Rows of the rendered results table
pub const RESULT_ROWS_CSS: &str = "table tbody tr";

/// Text inputs of a report form, date fields first
pub const TEXT_INPUTS_CSS: &str = "input[type='text']";

/// Selects the option of the first `<select>` whose text matches, case-insensitively
fn select_option_script(text: &str) -> String {
    let wanted = serde_json::Value::String(text.to_string());
    format!(
        "((wanted) => {{ const selects = Array.from(document.querySelectorAll('select')); \
         if (!selects.length) return 'no-selects'; \
         const sel = selects[0]; \
         const opt = Array.from(sel.options).find(o => \
           o.textContent.trim().toLowerCase() === wanted.trim().toLowerCase()); \
         if (!opt) return 'no-option'; \
         sel.value = opt.value; \
         sel.dispatchEvent(new Event('change', {{ bubbles: true }})); \
         return 'ok'; }})({wanted})"
    )
}

/// First day of `today`'s month through `today`
#[must_use]
pub fn month_to_date(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today.with_day(1).unwrap_or(today), today)
}

/// A driver bound to one configuration for one run
#[derive(Debug)]
pub struct Session<D: PageDriver> {
    driver: D,
    config: SessionConfig,
    resolver: Resolver,
    poller: Poller,
}

impl<D: PageDriver> Session<D> {
    /// Create a session; the run deadline starts now
    pub fn new(driver: D, config: SessionConfig) -> Self {
        let poller = config
            .deadline()
            .map_or_else(Poller::new, |budget| Poller::with_deadline(Deadline::after(budget)));
        let resolver = Resolver::new().with_attempt_timeout(config.timeouts.strategy);
        Self {
            driver,
            config,
            resolver,
            poller,
        }
    }

    /// The underlying driver
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// The session configuration
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The strategy resolver in use
    pub const fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// The poller in use
    pub const fn poller(&self) -> &Poller {
        &self.poller
    }

    fn wait(&self, timeout: Duration) -> WaitOptions {
        self.config.timeouts.wait(timeout)
    }

    /// Point browser downloads at the configured directory
    pub async fn prepare_downloads(&self) -> CosechaResult<()> {
        tokio::fs::create_dir_all(&self.config.download_dir).await?;
        self.driver.set_download_dir(&self.config.download_dir).await
    }

    /// Wait for a quiet network. A page that never settles is logged, not fatal.
    pub async fn wait_ready(&self) -> CosechaResult<()> {
        let result = self
            .poller
            .wait_for_load_state(
                &self.driver,
                LoadState::NetworkIdle,
                &self.wait(self.config.timeouts.ready),
            )
            .await;
        match result.status {
            WaitStatus::Ready => Ok(()),
            WaitStatus::TimedOut => {
                tracing::warn!(elapsed = ?result.elapsed, "page did not settle, continuing");
                Ok(())
            }
            WaitStatus::DeadlineExceeded => result.into_result().map(|_| ()),
        }
    }

    /// Navigate to `url` and wait for readiness
    pub async fn goto(&self, url: &str) -> CosechaResult<()> {
        tracing::info!(url, "navigating");
        self.driver
            .navigate(url, self.config.timeouts.navigation)
            .await?;
        self.wait_ready().await
    }

    /// Log in with the configured credentials.
    ///
    /// When login lands on an error page offering a way home, that link is
    /// followed. Its absence is normal.
    pub async fn login(&self) -> CosechaResult<()> {
        let form = &self.config.login_form;
        let creds = &self.config.credentials;
        tracing::info!(url = %self.config.login_url, user = %creds.username, "logging in");

        self.goto(&self.config.login_url).await?;
        self.resolver
            .resolve_and_act(
                &self.driver,
                &Target::field(&form.user_label),
                &ActionKind::Fill(creds.username.clone()),
            )
            .await?;
        self.resolver
            .resolve_and_act(
                &self.driver,
                &Target::field(&form.password_label),
                &ActionKind::Fill(creds.password.clone()),
            )
            .await?;
        self.resolver
            .click(&self.driver, &Target::button(&form.submit))
            .await?;
        self.wait_ready().await?;

        let recovery = Selector::text(form.recovery_link.as_str()).first();
        match self.driver.count(&recovery).await {
            Ok(n) if n > 0 => {
                tracing::warn!(link = %form.recovery_link, "landed on an error page, recovering");
                match self.driver.click(&recovery).await {
                    Ok(()) => self.wait_ready().await?,
                    Err(e) => tracing::warn!(error = %e, "recovery link did not respond"),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "recovery check failed"),
        }
        tracing::info!("login complete");
        Ok(())
    }

    /// Click `target`, trying its strategies in order
    pub async fn click(&self, target: &Target) -> CosechaResult<Selector> {
        self.resolver.click(&self.driver, target).await
    }

    /// Wait until `selector` matches something
    pub async fn wait_for(&self, selector: &Selector, timeout: Duration) -> CosechaResult<()> {
        self.poller
            .wait_for_count(&self.driver, selector, 1, &self.wait(timeout))
            .await
            .into_result()
            .map(|_| ())
    }

    /// Choose the option labelled `text` in the page's first `<select>`.
    ///
    /// The choice is retried until the configured timeout; the error names
    /// the last answer the page gave.
    pub async fn select_option(&self, text: &str) -> CosechaResult<()> {
        let timeouts = &self.config.timeouts;
        let script = select_option_script(text);
        let script = script.as_str();
        let last = Mutex::new(String::from("not attempted"));
        let last_ref = &last;
        let driver = &self.driver;
        let options = WaitOptions::from_durations(timeouts.select, timeouts.select_poll);

        let result = self
            .poller
            .wait_until(&format!("option '{text}'"), &options, move || async move {
                let answer = driver.evaluate(script).await?;
                let answer = answer.as_str().map_or_else(|| answer.to_string(), str::to_string);
                tracing::debug!(option = text, %answer, "select attempt");
                let ok = answer == "ok";
                *last_ref.lock().unwrap_or_else(PoisonError::into_inner) = answer;
                Ok(ok)
            })
            .await;

        let last = last.into_inner().unwrap_or_else(PoisonError::into_inner);
        match result.status {
            WaitStatus::Ready => {
                tracing::info!(option = text, "option selected");
                Ok(())
            }
            WaitStatus::TimedOut => Err(CosechaError::timed_out(
                format!("option '{text}' to be selectable (last result: {last})"),
                timeouts.select,
            )),
            WaitStatus::DeadlineExceeded => result.into_result().map(|_| ()),
        }
    }

    /// Type `start` and `end` into the first two text inputs
    pub async fn fill_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        format: &str,
    ) -> CosechaResult<()> {
        let inputs = Selector::css(TEXT_INPUTS_CSS);
        let found = self.driver.count(&inputs).await?;
        if found < 2 {
            return Err(CosechaError::page(format!(
                "expected at least 2 text inputs for dates, found {found}"
            )));
        }

        let timeouts = &self.config.timeouts;
        for (index, date) in [start, end].into_iter().enumerate() {
            let field = inputs.clone().nth(index);
            let value = date.format(format).to_string();
            tracing::info!(field = index, %value, "typing date");
            self.driver.click(&field).await?;
            self.driver.fill(&field, "").await?;
            self.driver
                .type_text(&field, &value, timeouts.typing_delay)
                .await?;
            tokio::time::sleep(timeouts.field_pause).await;
        }
        Ok(())
    }

    /// Wait until the results table has at least `min` rows
    pub async fn wait_for_rows(&self, min: usize, timeout: Duration) -> WaitResult {
        self.poller
            .wait_for_count(
                &self.driver,
                &Selector::css(RESULT_ROWS_CSS),
                min,
                &self.wait(timeout),
            )
            .await
    }

    /// Wait for a loading indicator to come and go
    pub async fn wait_loading_cycle(&self, indicator: &Selector) -> CosechaResult<Transient> {
        let timeouts = &self.config.timeouts;
        self.poller
            .wait_for_transient(
                &self.driver,
                indicator,
                &self.wait(timeouts.indicator_appear),
                &self.wait(timeouts.indicator_detach),
            )
            .await
    }

    /// Trigger a download through an export control and its menu, then move
    /// the finished file to `dest`.
    ///
    /// A previous file at `dest` is removed first. A menu item that does not
    /// respond is only logged since the download may start anyway.
    pub async fn export_download(
        &self,
        export: &Target,
        menu: &Target,
        dest: &Path,
    ) -> CosechaResult<StableFile> {
        let timeouts = &self.config.timeouts;
        let dir = &self.config.download_dir;
        remove_stale(dest).await?;
        tokio::fs::create_dir_all(dir).await?;
        let before = finished_files(dir).await?;

        self.resolver
            .resolve_and_act(&self.driver, export, &ActionKind::ScrollAndClick)
            .await?;
        tokio::time::sleep(timeouts.menu_pause).await;
        if let Err(e) = self.resolver.click(&self.driver, menu).await {
            tracing::warn!(menu = %menu, error = %e, "menu item did not respond, waiting for the file anyway");
        }

        let arrived = await_new_download(
            &self.poller,
            dir,
            &before,
            &self.wait(timeouts.download_appear),
        )
        .await?;
        let stable = await_stable_file(&self.poller, &arrived, &timeouts.stabilization()).await?;
        move_file(&stable.path, dest).await?;
        tracing::info!(path = %dest.display(), size = stable.size, "download saved");
        Ok(StableFile {
            path: dest.to_path_buf(),
            size: stable.size,
        })
    }

    /// Best grid on the current page
    pub async fn extract_best(&self, required_column: Option<&str>) -> CosechaResult<Grid> {
        table::extract_best(&self.driver, required_column).await
    }

    /// Poll the page until a qualifying grid is rendered
    pub async fn await_grid(
        &self,
        required_column: Option<&str>,
        timeout: Duration,
    ) -> CosechaResult<Grid> {
        let found: Mutex<Option<Grid>> = Mutex::new(None);
        let found_ref = &found;
        let driver = &self.driver;
        let options = WaitOptions::from_durations(timeout, self.config.timeouts.table_poll);
        let what = required_column.map_or_else(
            || "a data table".to_string(),
            |c| format!("a table with column '{c}'"),
        );

        let result = self
            .poller
            .wait_until(&what, &options, move || async move {
                let grid = table::extract_best(driver, required_column).await?;
                *found_ref.lock().unwrap_or_else(PoisonError::into_inner) = Some(grid);
                Ok(true)
            })
            .await;

        if let Some(grid) = found.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Ok(grid);
        }
        result.into_result()?;
        Err(CosechaError::not_found(what, Vec::new()))
    }

    /// Close the browser
    pub async fn close(&self) -> CosechaResult<()> {
        self.driver.close().await
    }
}
