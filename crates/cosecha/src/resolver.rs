//! Strategy resolver.
//!
//! Walks a [`Target`]'s strategies in declared order and performs the action
//! with the first one that works. Failures of earlier strategies are logged
//! and kept for diagnostics, never returned on success.

use crate::driver::Interactable;
use crate::locator::{Selector, Target};
use crate::result::{CosechaError, CosechaResult};
use std::fmt;
use std::time::Duration;

/// Default per-strategy time limit
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// What to do with a resolved element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Click it
    Click,
    /// Replace its value
    Fill(String),
    /// Type character by character
    Type {
        /// Text to type
        text: String,
        /// Pause between keystrokes
        delay: Duration,
    },
    /// Scroll it into view, then click it
    ScrollAndClick,
    /// Read its text
    ReadText,
    /// Read its outer HTML
    ReadHtml,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Click => write!(f, "click"),
            Self::Fill(_) => write!(f, "fill"),
            Self::Type { .. } => write!(f, "type"),
            Self::ScrollAndClick => write!(f, "scroll+click"),
            Self::ReadText => write!(f, "read text"),
            Self::ReadHtml => write!(f, "read html"),
        }
    }
}

/// Outcome of trying one strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    /// The strategy tried
    pub selector: Selector,
    /// `None` on success, the failure reason otherwise
    pub failure: Option<String>,
}

impl StrategyAttempt {
    /// Whether the action succeeded with this strategy
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

impl fmt::Display for StrategyAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            None => write!(f, "{}: ok", self.selector),
            Some(reason) => write!(f, "{}: {reason}", self.selector),
        }
    }
}

/// A successful resolution
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The strategy that worked
    pub selector: Selector,
    /// Text read by `ReadText`/`ReadHtml`, empty otherwise
    pub output: String,
    /// Every attempt made, the successful one last
    pub attempts: Vec<StrategyAttempt>,
}

/// Resolves targets against an [`Interactable`]
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    attempt_timeout: Duration,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl Resolver {
    /// Resolver with the default per-strategy timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time limit for a single strategy's locate-and-act
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Try each strategy of `target` in order until `action` succeeds.
    ///
    /// Returns `NotFound` listing every attempt when all strategies fail.
    pub async fn resolve_and_act<D>(
        &self,
        driver: &D,
        target: &Target,
        action: &ActionKind,
    ) -> CosechaResult<Resolved>
    where
        D: Interactable + ?Sized,
    {
        let mut attempts = Vec::with_capacity(target.strategies.len());

        for selector in &target.strategies {
            let outcome =
                tokio::time::timeout(self.attempt_timeout, act(driver, selector, action)).await;
            let failure = match outcome {
                Ok(Ok(output)) => {
                    tracing::debug!(%target, strategy = %selector, %action, "strategy succeeded");
                    attempts.push(StrategyAttempt {
                        selector: selector.clone(),
                        failure: None,
                    });
                    return Ok(Resolved {
                        selector: selector.clone(),
                        output,
                        attempts,
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no response within {}ms", self.attempt_timeout.as_millis()),
            };
            tracing::debug!(%target, strategy = %selector, %action, reason = %failure, "strategy failed");
            attempts.push(StrategyAttempt {
                selector: selector.clone(),
                failure: Some(failure),
            });
        }

        tracing::warn!(%target, %action, tried = attempts.len(), "no strategy worked");
        Err(CosechaError::not_found(
            target.to_string(),
            attempts.iter().map(ToString::to_string).collect(),
        ))
    }

    /// Click `target`
    pub async fn click<D>(&self, driver: &D, target: &Target) -> CosechaResult<Selector>
    where
        D: Interactable + ?Sized,
    {
        self.resolve_and_act(driver, target, &ActionKind::Click)
            .await
            .map(|r| r.selector)
    }

    /// Read the outer HTML of `target`
    pub async fn read_html<D>(&self, driver: &D, target: &Target) -> CosechaResult<String>
    where
        D: Interactable + ?Sized,
    {
        self.resolve_and_act(driver, target, &ActionKind::ReadHtml)
            .await
            .map(|r| r.output)
    }
}

async fn act<D>(driver: &D, selector: &Selector, action: &ActionKind) -> CosechaResult<String>
where
    D: Interactable + ?Sized,
{
    match action {
        ActionKind::Click => driver.click(selector).await.map(|()| String::new()),
        ActionKind::Fill(text) => driver.fill(selector, text).await.map(|()| String::new()),
        ActionKind::Type { text, delay } => {
            driver.fill(selector, "").await?;
            driver
                .type_text(selector, text, *delay)
                .await
                .map(|()| String::new())
        }
        ActionKind::ScrollAndClick => {
            driver.scroll_into_view(selector).await?;
            driver.click(selector).await.map(|()| String::new())
        }
        ActionKind::ReadText => driver.text_content(selector).await,
        ActionKind::ReadHtml => driver.outer_html(selector).await,
    }
}
