//! Page driver abstraction.
//!
//! [`Interactable`] is the element-level capability set every lookup strategy
//! needs. [`PageDriver`] adds page-level operations. The Chromium backend
//! lives in [`crate::browser`] behind the `browser` feature; [`MockDriver`]
//! is an in-memory scripted page used by the test suites.

use crate::locator::Selector;
use crate::result::{CosechaError, CosechaResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Script returning the page's readiness snapshot
pub const LOAD_SNAPSHOT_JS: &str = "({ readyState: document.readyState, \
resourceCount: performance.getEntriesByType('resource').length })";

/// Element-level operations, all addressed by a [`Selector`]
#[async_trait]
pub trait Interactable: Send + Sync {
    /// Number of elements the selector currently matches
    async fn count(&self, selector: &Selector) -> CosechaResult<usize>;

    /// Click the element
    async fn click(&self, selector: &Selector) -> CosechaResult<()>;

    /// Replace the element's value
    async fn fill(&self, selector: &Selector, text: &str) -> CosechaResult<()>;

    /// Type text one character at a time with `delay` between keystrokes
    async fn type_text(&self, selector: &Selector, text: &str, delay: Duration)
        -> CosechaResult<()>;

    /// Scroll the element into the viewport
    async fn scroll_into_view(&self, selector: &Selector) -> CosechaResult<()>;

    /// Rendered text of the element
    async fn text_content(&self, selector: &Selector) -> CosechaResult<String>;

    /// Outer HTML of the element
    async fn outer_html(&self, selector: &Selector) -> CosechaResult<String>;
}

/// Page-level operations
#[async_trait]
pub trait PageDriver: Interactable {
    /// Navigate to URL, failing if it does not commit within `timeout`
    async fn navigate(&self, url: &str, timeout: Duration) -> CosechaResult<()>;

    /// Evaluate a JavaScript expression and return its JSON value
    async fn evaluate(&self, script: &str) -> CosechaResult<serde_json::Value>;

    /// Current page URL
    async fn current_url(&self) -> CosechaResult<String>;

    /// Document ready state and number of loaded resources
    async fn load_snapshot(&self) -> CosechaResult<LoadSnapshot> {
        let value = self.evaluate(LOAD_SNAPSHOT_JS).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Directory where downloads land
    async fn set_download_dir(&self, dir: &Path) -> CosechaResult<()>;

    /// Close the page and release the browser
    async fn close(&self) -> CosechaResult<()>;
}

/// Readiness snapshot of the current document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSnapshot {
    /// `document.readyState`
    pub ready_state: String,
    /// Resource timing entries seen so far
    pub resource_count: u64,
}

impl LoadSnapshot {
    /// Create a snapshot
    #[must_use]
    pub fn new(ready_state: impl Into<String>, resource_count: u64) -> Self {
        Self {
            ready_state: ready_state.into(),
            resource_count,
        }
    }

    /// Whether the DOM has been parsed
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        matches!(self.ready_state.as_str(), "interactive" | "complete")
    }

    /// Whether the `load` event has fired
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ready_state == "complete"
    }
}

impl Default for LoadSnapshot {
    fn default() -> Self {
        Self::new("complete", 0)
    }
}

// =============================================================================
// MOCK DRIVER
// =============================================================================

/// Element served by [`MockDriver`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockElement {
    /// Rendered text
    pub text: String,
    /// Outer HTML
    pub html: String,
}

impl MockElement {
    /// Element with text and no markup
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: String::new(),
        }
    }

    /// Element identified only by its markup
    #[must_use]
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            html: html.into(),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    elements: HashMap<String, Vec<MockElement>>,
    failures: HashMap<String, String>,
    values: HashMap<String, String>,
    eval_results: VecDeque<serde_json::Value>,
    snapshot: LoadSnapshot,
    navigation_failures: u32,
    download_dir: Option<PathBuf>,
    downloads: HashMap<String, (String, Vec<u8>)>,
    closed: bool,
    history: Vec<String>,
}

/// Mock driver for unit testing
///
/// Elements are registered per selector. Clones share state, so a test can
/// keep a handle and change the page while a session polls it.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the elements a selector matches, replacing any previous set
    pub fn set_elements(&self, selector: &Selector, elements: Vec<MockElement>) {
        self.state().elements.insert(selector.to_string(), elements);
    }

    /// Register a single element for a selector
    pub fn add_element(&self, selector: &Selector, element: MockElement) {
        self.state()
            .elements
            .entry(selector.to_string())
            .or_default()
            .push(element);
    }

    /// Remove every element a selector matches
    pub fn remove_elements(&self, selector: &Selector) {
        self.state().elements.remove(&selector.to_string());
    }

    /// Make every action on a selector fail with `message`
    pub fn fail_on(&self, selector: &Selector, message: impl Into<String>) {
        self.state()
            .failures
            .insert(selector.to_string(), message.into());
    }

    /// Queue a result for the next `evaluate` call
    pub fn push_eval_result(&self, value: serde_json::Value) {
        self.state().eval_results.push_back(value);
    }

    /// Set the readiness snapshot
    pub fn set_snapshot(&self, snapshot: LoadSnapshot) {
        self.state().snapshot = snapshot;
    }

    /// Fail the next `n` navigations
    pub fn fail_navigations(&self, n: u32) {
        self.state().navigation_failures = n;
    }

    /// Write `file_name` into the download directory when `selector` is clicked
    pub fn download_on_click(
        &self,
        selector: &Selector,
        file_name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) {
        self.state()
            .downloads
            .insert(selector.to_string(), (file_name.into(), bytes.into()));
    }

    /// Value last filled or typed into a selector
    #[must_use]
    pub fn value_of(&self, selector: &Selector) -> Option<String> {
        self.state().values.get(&selector.to_string()).cloned()
    }

    /// Configured download directory
    #[must_use]
    pub fn download_dir(&self) -> Option<PathBuf> {
        self.state().download_dir.clone()
    }

    /// Whether `close` was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.state().history.clone()
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.state().history.iter().any(|c| c.starts_with(method))
    }

    /// Number of recorded calls starting with `prefix`
    #[must_use]
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state()
            .history
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn matches(state: &MockState, selector: &Selector) -> Vec<MockElement> {
        match selector {
            Selector::Nth { inner, index } => Self::matches(state, inner)
                .into_iter()
                .nth(*index)
                .into_iter()
                .collect(),
            other => state
                .elements
                .get(&other.to_string())
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Resolve the single element an action applies to
    fn target(&self, action: &str, selector: &Selector) -> CosechaResult<MockElement> {
        let mut state = self.state();
        state.history.push(format!("{action}:{selector}"));
        if let Some(message) = state.failures.get(&selector.to_string()) {
            return Err(CosechaError::page(message.clone()));
        }
        let found = Self::matches(&state, selector);
        match found.len() {
            0 => Err(CosechaError::page(format!("no element matches {selector}"))),
            1 => Ok(found.into_iter().next().unwrap_or_default()),
            n if selector.is_strict() => Err(CosechaError::page(format!(
                "strict mode violation: {selector} matched {n} elements"
            ))),
            _ => Ok(found.into_iter().next().unwrap_or_default()),
        }
    }
}

#[async_trait]
impl Interactable for MockDriver {
    async fn count(&self, selector: &Selector) -> CosechaResult<usize> {
        let state = self.state();
        Ok(Self::matches(&state, selector).len())
    }

    async fn click(&self, selector: &Selector) -> CosechaResult<()> {
        self.target("click", selector)?;
        let mut state = self.state();
        let download = state.downloads.get(&selector.to_string()).cloned();
        if let (Some((name, bytes)), Some(dir)) = (download, state.download_dir.clone()) {
            std::fs::write(dir.join(name), bytes)?;
            state.history.push(format!("download:{selector}"));
        }
        Ok(())
    }

    async fn fill(&self, selector: &Selector, text: &str) -> CosechaResult<()> {
        self.target("fill", selector)?;
        self.state()
            .values
            .insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &Selector,
        text: &str,
        delay: Duration,
    ) -> CosechaResult<()> {
        self.target("type", selector)?;
        for _ in text.chars() {
            tokio::time::sleep(delay).await;
        }
        self.state()
            .values
            .entry(selector.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn scroll_into_view(&self, selector: &Selector) -> CosechaResult<()> {
        self.target("scroll", selector).map(|_| ())
    }

    async fn text_content(&self, selector: &Selector) -> CosechaResult<String> {
        self.target("text", selector).map(|el| el.text)
    }

    async fn outer_html(&self, selector: &Selector) -> CosechaResult<String> {
        self.target("html", selector).map(|el| el.html)
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> CosechaResult<()> {
        let mut state = self.state();
        state.history.push(format!("navigate:{url}"));
        if state.navigation_failures > 0 {
            state.navigation_failures -= 1;
            return Err(CosechaError::Navigation {
                url: url.to_string(),
                message: "mock navigation failure".to_string(),
            });
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> CosechaResult<serde_json::Value> {
        let mut state = self.state();
        state.history.push("evaluate".to_string());
        Ok(state
            .eval_results
            .pop_front()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn current_url(&self) -> CosechaResult<String> {
        Ok(self.state().url.clone())
    }

    async fn load_snapshot(&self) -> CosechaResult<LoadSnapshot> {
        Ok(self.state().snapshot.clone())
    }

    async fn set_download_dir(&self, dir: &Path) -> CosechaResult<()> {
        let mut state = self.state();
        state.history.push(format!("download_dir:{}", dir.display()));
        state.download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> CosechaResult<()> {
        let mut state = self.state();
        state.history.push("close".to_string());
        state.closed = true;
        Ok(())
    }
}
