//! Selectors and logical targets.
//!
//! A [`Selector`] is one way of finding an element. A [`Target`] is a named
//! UI control plus an ordered list of selectors, cheapest first, that the
//! resolver walks until one of them works.
//!
//! # Strictness
//!
//! Bare selectors are strict: acting on one fails when it matches more than
//! one element. Wrap a selector in [`Selector::Nth`] (or call
//! [`Selector::first`]) to pick by position instead.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared JS helpers prepended to every generated query.
const JS_PRELUDE: &str = "const __norm = s => (s || '').replace(/\\s+/g, ' ').trim(); \
const __match = (hay, needle, exact) => exact \
? __norm(hay) === __norm(needle) \
: __norm(hay).toLowerCase().includes(__norm(needle).toLowerCase()); \
const __name = el => el.getAttribute('aria-label') || el.innerText || el.textContent || el.value || '';";

/// Selector type for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Selector {
    /// CSS selector (e.g., "button.primary")
    Css {
        /// The CSS expression
        css: String,
    },
    /// Innermost elements whose text matches
    Text {
        /// Text to match
        text: String,
        /// Whole-string, case-sensitive match when true
        #[serde(default)]
        exact: bool,
    },
    /// ARIA role plus accessible name
    Role {
        /// Role name (button, link, tab, menuitem, ...)
        role: String,
        /// Accessible name to match
        name: String,
        /// Whole-string, case-sensitive match when true
        #[serde(default)]
        exact: bool,
    },
    /// Form control associated with a label
    Label {
        /// Label text
        text: String,
    },
    /// CSS selector filtered by text content
    CssWithText {
        /// Base CSS selector
        css: String,
        /// Text content to match
        text: String,
    },
    /// The `index`-th match of another selector
    Nth {
        /// Selector to index into
        inner: Box<Selector>,
        /// Zero-based position
        index: usize,
    },
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css {
            css: selector.into(),
        }
    }

    /// Create a substring text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            exact: false,
        }
    }

    /// Create a role selector with substring name matching
    #[must_use]
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.into(),
            exact: false,
        }
    }

    /// Create a label selector
    #[must_use]
    pub fn label(text: impl Into<String>) -> Self {
        Self::Label { text: text.into() }
    }

    /// Create a CSS selector filtered by text
    #[must_use]
    pub fn css_with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self::CssWithText {
            css: css.into(),
            text: text.into(),
        }
    }

    /// Pick the `index`-th match of this selector
    #[must_use]
    pub fn nth(self, index: usize) -> Self {
        Self::Nth {
            inner: Box::new(self),
            index,
        }
    }

    /// Pick the first match of this selector
    #[must_use]
    pub fn first(self) -> Self {
        self.nth(0)
    }

    /// Whether acting on this selector requires exactly one match
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        !matches!(self, Self::Nth { .. })
    }

    /// JavaScript expression evaluating to an array of matching elements
    #[must_use]
    pub fn to_query_all(&self) -> String {
        format!("(() => {{ {JS_PRELUDE} return {}; }})()", self.query_body())
    }

    /// JavaScript expression evaluating to the number of matches
    #[must_use]
    pub fn to_count_query(&self) -> String {
        format!("{}.length", self.to_query_all())
    }

    fn query_body(&self) -> String {
        match self {
            Self::Css { css } => format!("Array.from(document.querySelectorAll({}))", js_str(css)),
            Self::Text { text, exact } => format!(
                "Array.from(document.querySelectorAll('body *')).filter(el => \
                 !['SCRIPT', 'STYLE', 'NOSCRIPT'].includes(el.tagName) \
                 && __match(el.textContent, {t}, {exact}) \
                 && !Array.from(el.children).some(c => __match(c.textContent, {t}, {exact})))",
                t = js_str(text),
            ),
            Self::Role { role, name, exact } => format!(
                "Array.from(document.querySelectorAll({})).filter(el => __match(__name(el), {}, {exact}))",
                js_str(&role_css(role)),
                js_str(name),
            ),
            Self::Label { text } => format!(
                "Array.from(new Set([\
                 ...Array.from(document.querySelectorAll('label')).filter(l => __match(l.textContent, {t}, false))\
                 .map(l => l.control || (l.htmlFor && document.getElementById(l.htmlFor)) || l.querySelector('input, select, textarea')),\
                 ...Array.from(document.querySelectorAll('[aria-label], [placeholder]'))\
                 .filter(el => __match(el.getAttribute('aria-label') || el.getAttribute('placeholder'), {t}, false))\
                 ])).filter(Boolean)",
                t = js_str(text),
            ),
            Self::CssWithText { css, text } => format!(
                "Array.from(document.querySelectorAll({})).filter(el => __match(el.textContent, {}, false))",
                js_str(css),
                js_str(text),
            ),
            Self::Nth { inner, index } => {
                format!("[({})[{index}]].filter(Boolean)", inner.query_body())
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css { css } => write!(f, "css={css}"),
            Self::Text { text, exact } => {
                write!(f, "text={text:?}")?;
                if *exact {
                    write!(f, "[exact]")?;
                }
                Ok(())
            }
            Self::Role { role, name, .. } => write!(f, "role={role}[name={name:?}]"),
            Self::Label { text } => write!(f, "label={text:?}"),
            Self::CssWithText { css, text } => write!(f, "{css}:has-text({text:?})"),
            Self::Nth { inner, index } => write!(f, "{inner} >> nth={index}"),
        }
    }
}

/// CSS covering the elements that carry an ARIA role implicitly or explicitly
fn role_css(role: &str) -> String {
    match role {
        "button" => {
            "button, input[type=button], input[type=submit], input[type=reset], [role=button]"
                .to_string()
        }
        "link" => "a[href], [role=link]".to_string(),
        "menuitem" => "[role=menuitem], [role=menuitemcheckbox], [role=menuitemradio]".to_string(),
        "textbox" => "input:not([type]), input[type=text], input[type=email], \
                      input[type=password], textarea, [role=textbox]"
            .to_string(),
        "combobox" => "select, [role=combobox]".to_string(),
        other => format!("[role={other}]"),
    }
}

/// Encode a Rust string as a JavaScript string literal
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// A named UI control and its ranked lookup strategies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Human-readable label used in logs and errors
    pub label: String,
    /// Strategies in the order they are tried
    pub strategies: Vec<Selector>,
}

impl Target {
    /// Create a target with no strategies yet
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            strategies: Vec::new(),
        }
    }

    /// Append a strategy
    #[must_use]
    pub fn by(mut self, selector: Selector) -> Self {
        self.strategies.push(selector);
        self
    }

    /// Append a role strategy
    #[must_use]
    pub fn by_role(self, role: impl Into<String>, name: impl Into<String>) -> Self {
        self.by(Selector::role(role, name))
    }

    /// Append a first-text-match strategy
    #[must_use]
    pub fn by_text(self, text: impl Into<String>) -> Self {
        self.by(Selector::text(text).first())
    }

    /// Append a CSS strategy
    #[must_use]
    pub fn by_css(self, css: impl Into<String>) -> Self {
        self.by(Selector::css(css))
    }

    /// Append a label strategy
    #[must_use]
    pub fn by_label(self, text: impl Into<String>) -> Self {
        self.by(Selector::label(text))
    }

    /// A button: by role, then the first `<button>` with the text, then any
    /// element with the text.
    #[must_use]
    pub fn button(name: &str) -> Self {
        Self::new(name)
            .by_role("button", name)
            .by(Selector::css_with_text("button", name).first())
            .by_text(name)
    }

    /// A tab that may be rendered as a button, a link or bare text. Every
    /// spelling is tried with all three strategies before the next one.
    #[must_use]
    pub fn tab(spellings: &[&str]) -> Self {
        let label = spellings.first().copied().unwrap_or_default();
        spellings.iter().fold(Self::new(label), |target, name| {
            target
                .by_role("button", *name)
                .by(Selector::css_with_text("a", *name).first())
                .by_text(*name)
        })
    }

    /// A dropdown menu entry
    #[must_use]
    pub fn menu_item(name: &str) -> Self {
        Self::new(name).by_role("menuitem", name).by_text(name)
    }

    /// A form field located by its label
    #[must_use]
    pub fn field(label: &str) -> Self {
        Self::new(label).by_label(label)
    }

    /// Whether no strategies were declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.label)
    }
}
