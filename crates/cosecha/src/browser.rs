//! Chromium control over CDP.
//!
//! [`BrowserConfig`] is always available so callers can build it from their
//! own configuration. [`ChromiumDriver`] needs the `browser` feature.
//!
//! Selectors other than plain CSS cannot be handed to CDP directly. The
//! driver evaluates the selector's query, tags the chosen element with a
//! unique `data-cosecha-mark` attribute and finds it again by CSS, so clicks
//! and typing go through real input events.

use std::path::PathBuf;
use std::time::Duration;

/// Browser launch configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run without a visible window
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<PathBuf>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// Timeout for individual CDP requests
    pub request_timeout: Duration,
    /// Extra command-line switches
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            chromium_path: None,
            sandbox: true,
            request_timeout: Duration::from_secs(60),
            args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Add a command-line switch
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Script that tags the element a selector resolves to.
///
/// Returns the match count. Strict selectors with several matches tag nothing.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
fn mark_script(selector: &crate::locator::Selector, mark: &str) -> String {
    format!(
        "(() => {{ document.querySelectorAll('[data-cosecha-mark]')\
         .forEach(e => e.removeAttribute('data-cosecha-mark')); \
         const all = {query}; \
         if (all.length === 0 || ({strict} && all.length > 1)) return all.length; \
         all[0].setAttribute('data-cosecha-mark', '{mark}'); return all.length; }})()",
        query = selector.to_query_all(),
        strict = selector.is_strict(),
    )
}

#[cfg(feature = "browser")]
mod cdp {
    use super::{mark_script, BrowserConfig};
    use crate::driver::{Interactable, PageDriver};
    use crate::locator::Selector;
    use crate::result::{CosechaError, CosechaResult};
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::browser::{
        SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
    };
    use chromiumoxide::element::Element;
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn page_err(e: impl std::fmt::Display) -> CosechaError {
        CosechaError::page(e.to_string())
    }

    /// [`PageDriver`] backed by a real Chromium
    #[derive(Debug)]
    pub struct ChromiumDriver {
        browser: Mutex<CdpBrowser>,
        page: CdpPage,
        handler: tokio::task::JoinHandle<()>,
    }

    impl ChromiumDriver {
        /// Launch Chromium and open one blank page
        pub async fn launch(config: &BrowserConfig) -> CosechaResult<Self> {
            let mut builder = CdpConfig::builder()
                .request_timeout(config.request_timeout)
                .window_size(config.viewport_width, config.viewport_height);

            if !config.headless {
                builder = builder.with_head();
            }
            if !config.sandbox {
                builder = builder.no_sandbox();
            }
            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }
            for arg in &config.args {
                builder = builder.arg(arg.as_str());
            }

            let cdp_config = builder
                .build()
                .map_err(|message| CosechaError::BrowserLaunch { message })?;

            let (browser, mut handler) =
                CdpBrowser::launch(cdp_config)
                    .await
                    .map_err(|e| CosechaError::BrowserLaunch {
                        message: e.to_string(),
                    })?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        tracing::debug!(error = %e, "cdp handler error");
                    }
                }
            });

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| CosechaError::BrowserLaunch {
                    message: e.to_string(),
                })?;

            tracing::info!(headless = config.headless, "browser launched");
            Ok(Self {
                browser: Mutex::new(browser),
                page,
                handler,
            })
        }

        /// Resolve `selector` to a CDP element via a one-off mark attribute
        async fn locate(&self, selector: &Selector) -> CosechaResult<Element> {
            if let Selector::Css { css } = selector {
                let count = self.count(selector).await?;
                return match count {
                    0 => Err(CosechaError::page(format!("no element matches {selector}"))),
                    1 => self.page.find_element(css.as_str()).await.map_err(page_err),
                    n => Err(CosechaError::page(format!(
                        "strict mode violation: {selector} matched {n} elements"
                    ))),
                };
            }

            let mark = uuid::Uuid::new_v4().simple().to_string();
            let count = self
                .evaluate(&mark_script(selector, &mark))
                .await?
                .as_u64()
                .unwrap_or(0);
            match count {
                0 => Err(CosechaError::page(format!("no element matches {selector}"))),
                n if n > 1 && selector.is_strict() => Err(CosechaError::page(format!(
                    "strict mode violation: {selector} matched {n} elements"
                ))),
                _ => self
                    .page
                    .find_element(format!("[data-cosecha-mark=\"{mark}\"]"))
                    .await
                    .map_err(page_err),
            }
        }
    }

    #[async_trait]
    impl Interactable for ChromiumDriver {
        async fn count(&self, selector: &Selector) -> CosechaResult<usize> {
            let value = self.evaluate(&selector.to_count_query()).await?;
            Ok(value.as_u64().unwrap_or(0) as usize)
        }

        async fn click(&self, selector: &Selector) -> CosechaResult<()> {
            let element = self.locate(selector).await?;
            element.scroll_into_view().await.map_err(page_err)?;
            element.click().await.map_err(page_err)?;
            Ok(())
        }

        async fn fill(&self, selector: &Selector, text: &str) -> CosechaResult<()> {
            let element = self.locate(selector).await?;
            let value = serde_json::Value::String(text.to_string());
            element
                .call_js_fn(
                    format!(
                        "function() {{ this.focus(); this.value = {value}; \
                         this.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                         this.dispatchEvent(new Event('change', {{ bubbles: true }})); }}"
                    ),
                    false,
                )
                .await
                .map_err(page_err)?;
            Ok(())
        }

        async fn type_text(
            &self,
            selector: &Selector,
            text: &str,
            delay: Duration,
        ) -> CosechaResult<()> {
            let element = self.locate(selector).await?;
            element.focus().await.map_err(page_err)?;
            let mut buf = [0u8; 4];
            for ch in text.chars() {
                element
                    .type_str(ch.encode_utf8(&mut buf))
                    .await
                    .map_err(page_err)?;
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }

        async fn scroll_into_view(&self, selector: &Selector) -> CosechaResult<()> {
            let element = self.locate(selector).await?;
            element.scroll_into_view().await.map_err(page_err)?;
            Ok(())
        }

        async fn text_content(&self, selector: &Selector) -> CosechaResult<String> {
            let element = self.locate(selector).await?;
            Ok(element
                .inner_text()
                .await
                .map_err(page_err)?
                .unwrap_or_default())
        }

        async fn outer_html(&self, selector: &Selector) -> CosechaResult<String> {
            let element = self.locate(selector).await?;
            Ok(element
                .outer_html()
                .await
                .map_err(page_err)?
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl PageDriver for ChromiumDriver {
        async fn navigate(&self, url: &str, timeout: Duration) -> CosechaResult<()> {
            let nav_err = |message: String| CosechaError::Navigation {
                url: url.to_string(),
                message,
            };
            tokio::time::timeout(timeout, self.page.goto(url))
                .await
                .map_err(|_| nav_err(format!("no response within {}ms", timeout.as_millis())))?
                .map_err(|e| nav_err(e.to_string()))?;
            tracing::debug!(url, "navigated");
            Ok(())
        }

        async fn evaluate(&self, script: &str) -> CosechaResult<serde_json::Value> {
            let result = self
                .page
                .evaluate(script)
                .await
                .map_err(|e| CosechaError::script(e.to_string()))?;
            Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
        }

        async fn current_url(&self) -> CosechaResult<String> {
            Ok(self
                .page
                .url()
                .await
                .map_err(page_err)?
                .unwrap_or_default())
        }

        async fn set_download_dir(&self, dir: &Path) -> CosechaResult<()> {
            tokio::fs::create_dir_all(dir).await?;
            let params = SetDownloadBehaviorParams::builder()
                .behavior(SetDownloadBehaviorBehavior::Allow)
                .download_path(dir.display().to_string())
                .build()
                .map_err(CosechaError::page)?;
            self.page.execute(params).await.map_err(page_err)?;
            tracing::debug!(dir = %dir.display(), "downloads enabled");
            Ok(())
        }

        async fn close(&self) -> CosechaResult<()> {
            let mut browser = self.browser.lock().await;
            browser.close().await.map_err(page_err)?;
            if let Err(e) = browser.wait().await {
                tracing::debug!(error = %e, "browser process wait failed");
            }
            self.handler.abort();
            tracing::info!("browser closed");
            Ok(())
        }
    }
}

#[cfg(feature = "browser")]
pub use cdp::ChromiumDriver;
