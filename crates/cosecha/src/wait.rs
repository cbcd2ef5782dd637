//! Condition polling.
//!
//! Every wait in the crate goes through [`Poller::wait_until`]: evaluate a
//! predicate, sleep, repeat, until it holds or the budget runs out. A
//! predicate that errors counts as `false` for that iteration. Timeouts are
//! returned as a [`WaitResult`] so the caller decides whether they are fatal.
//!
//! A [`Deadline`] caps every wait made through the same poller, so one hung
//! page cannot hold up a whole run.

use crate::driver::{LoadSnapshot, PageDriver};
use crate::locator::Selector;
use crate::result::{CosechaError, CosechaResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default timeout for wait operations (30 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Default polling interval (250ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Smallest interval between predicate evaluations (10ms)
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Network idle threshold (500ms without new resources)
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

// =============================================================================
// LOAD STATE
// =============================================================================

/// Page load states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// The `load` event has fired
    #[default]
    Load,
    /// The DOM has been parsed
    DomContentLoaded,
    /// Loaded, and no new resources for 500ms
    NetworkIdle,
}

impl LoadState {
    /// Get the event name for this load state
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::NetworkIdle => "networkidle",
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

/// Tracks resource counts across polls to detect a quiet network
#[derive(Debug, Default)]
struct IdleTracker {
    last_count: Option<u64>,
    quiet_since: Option<Instant>,
}

impl IdleTracker {
    fn observe(&mut self, snapshot: &LoadSnapshot, now: Instant, quiet: Duration) -> bool {
        if !snapshot.is_complete() {
            *self = Self::default();
            return false;
        }
        if self.last_count == Some(snapshot.resource_count) {
            let since = *self.quiet_since.get_or_insert(now);
            return now.duration_since(since) >= quiet;
        }
        self.last_count = Some(snapshot.resource_count);
        self.quiet_since = Some(now);
        false
    }
}

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Options for wait operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options from durations
    #[must_use]
    pub const fn from_durations(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            poll_interval_ms: poll_interval.as_millis() as u64,
        }
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// =============================================================================
// WAIT RESULT
// =============================================================================

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The predicate held
    Ready,
    /// The wait's own timeout elapsed
    TimedOut,
    /// The poller's deadline expired first
    DeadlineExceeded,
}

/// Result of a wait operation
#[derive(Debug, Clone)]
pub struct WaitResult {
    /// How the wait ended
    pub status: WaitStatus,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Number of predicate evaluations
    pub polls: u32,
    /// Description of what was waited for
    pub waited_for: String,
    /// The timeout the wait ran under
    pub budget: Duration,
}

impl WaitResult {
    /// Whether the predicate held
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == WaitStatus::Ready
    }

    /// Turn a non-ready outcome into the matching error
    pub fn into_result(self) -> CosechaResult<Self> {
        match self.status {
            WaitStatus::Ready => Ok(self),
            WaitStatus::TimedOut => Err(CosechaError::timed_out(self.waited_for, self.budget)),
            WaitStatus::DeadlineExceeded => Err(CosechaError::DeadlineExceeded {
                waited_for: self.waited_for,
            }),
        }
    }
}

/// Outcome of waiting for a transient element such as a spinner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transient {
    /// It never showed up; the operation may have been instantaneous
    NeverAppeared,
    /// It appeared and then went away
    Detached,
}

// =============================================================================
// DEADLINE
// =============================================================================

/// A point in time after which no wait may continue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left before expiry
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// Runs polling loops under an optional run-wide deadline
#[derive(Debug, Clone, Copy, Default)]
pub struct Poller {
    deadline: Option<Deadline>,
}

impl Poller {
    /// Poller with no deadline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Poller bounded by `deadline`
    #[must_use]
    pub const fn with_deadline(deadline: Deadline) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// The deadline, if any
    #[must_use]
    pub const fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    /// Evaluate `predicate` until it returns `Ok(true)` or time runs out.
    ///
    /// The first evaluation happens immediately. Sleeps never overshoot the
    /// timeout, so a wait never ends before its timeout unless the predicate
    /// held or the deadline expired.
    pub async fn wait_until<F, Fut>(
        &self,
        waited_for: &str,
        options: &WaitOptions,
        mut predicate: F,
    ) -> WaitResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CosechaResult<bool>>,
    {
        let start = Instant::now();
        let timeout = options.timeout();
        let interval = options
            .poll_interval()
            .max(Duration::from_millis(MIN_POLL_INTERVAL_MS));
        let mut polls = 0u32;

        let finish = |status, polls| WaitResult {
            status,
            elapsed: start.elapsed(),
            polls,
            waited_for: waited_for.to_string(),
            budget: timeout,
        };

        loop {
            if self.deadline.is_some_and(|d| d.is_expired()) {
                tracing::warn!(waited_for, "run deadline exceeded");
                return finish(WaitStatus::DeadlineExceeded, polls);
            }

            polls += 1;
            let bound = self.cap(timeout.saturating_sub(start.elapsed()).max(interval));
            match tokio::time::timeout(bound, predicate()).await {
                Ok(Ok(true)) => {
                    tracing::trace!(waited_for, polls, "condition met");
                    return finish(WaitStatus::Ready, polls);
                }
                Ok(Ok(false)) => tracing::trace!(waited_for, polls, "condition not met"),
                Ok(Err(e)) => tracing::debug!(waited_for, polls, error = %e, "predicate failed"),
                Err(_) => tracing::debug!(waited_for, polls, "predicate did not answer in time"),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                tracing::debug!(waited_for, polls, ?elapsed, "wait timed out");
                return finish(WaitStatus::TimedOut, polls);
            }
            tokio::time::sleep(self.cap(interval.min(timeout - elapsed))).await;
        }
    }

    fn cap(&self, d: Duration) -> Duration {
        self.deadline.map_or(d, |deadline| d.min(deadline.remaining()))
    }

    /// Wait until the page reaches `state`
    pub async fn wait_for_load_state<D>(
        &self,
        driver: &D,
        state: LoadState,
        options: &WaitOptions,
    ) -> WaitResult
    where
        D: PageDriver + ?Sized,
    {
        let tracker = Mutex::new(IdleTracker::default());
        let tracker = &tracker;
        let quiet = Duration::from_millis(NETWORK_IDLE_THRESHOLD_MS);
        self.wait_until(state.event_name(), options, move || async move {
            let snapshot = driver.load_snapshot().await?;
            Ok(match state {
                LoadState::DomContentLoaded => snapshot.is_interactive(),
                LoadState::Load => snapshot.is_complete(),
                LoadState::NetworkIdle => tracker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .observe(&snapshot, Instant::now(), quiet),
            })
        })
        .await
    }

    /// Wait until `selector` matches at least `min` elements
    pub async fn wait_for_count<D>(
        &self,
        driver: &D,
        selector: &Selector,
        min: usize,
        options: &WaitOptions,
    ) -> WaitResult
    where
        D: PageDriver + ?Sized,
    {
        let what = format!("at least {min} match(es) of {selector}");
        self.wait_until(&what, options, move || async move {
            Ok(driver.count(selector).await? >= min)
        })
        .await
    }

    /// Wait for an element to appear and then detach.
    ///
    /// Not appearing within `appear` is [`Transient::NeverAppeared`], not an
    /// error. Appearing and not detaching within `detach` is `TimedOut`.
    pub async fn wait_for_transient<D>(
        &self,
        driver: &D,
        selector: &Selector,
        appear: &WaitOptions,
        detach: &WaitOptions,
    ) -> CosechaResult<Transient>
    where
        D: PageDriver + ?Sized,
    {
        let shown = self
            .wait_until(&format!("{selector} to appear"), appear, move || async move {
                Ok(driver.count(selector).await? > 0)
            })
            .await;
        if shown.status == WaitStatus::TimedOut {
            tracing::info!(%selector, "indicator never appeared");
            return Ok(Transient::NeverAppeared);
        }
        shown.into_result()?;

        self.wait_until(&format!("{selector} to detach"), detach, move || async move {
            Ok(driver.count(selector).await? == 0)
        })
        .await
        .into_result()?;
        Ok(Transient::Detached)
    }

    /// Wait until the first match of `selector` is visible and enabled
    pub async fn wait_for_clickable<D>(
        &self,
        driver: &D,
        selector: &Selector,
        options: &WaitOptions,
    ) -> WaitResult
    where
        D: PageDriver + ?Sized,
    {
        let script = clickable_script(selector);
        let script = script.as_str();
        let what = format!("{selector} to be clickable");
        self.wait_until(&what, options, move || async move {
            Ok(driver.evaluate(script).await?.as_bool().unwrap_or(false))
        })
        .await
    }
}

fn clickable_script(selector: &Selector) -> String {
    format!(
        "(() => {{ const el = ({})[0]; if (!el) return false; \
         const r = el.getBoundingClientRect(); const s = getComputedStyle(el); \
         return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' \
         && s.pointerEvents !== 'none' && !el.disabled; }})()",
        selector.to_query_all()
    )
}
