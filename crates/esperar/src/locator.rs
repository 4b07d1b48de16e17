//! Selectors and ordered selector chains.
//!
//! One semantic concept (a notification, a field error, a name field) is often
//! rendered with several incompatible markup conventions. A [`SelectorChain`]
//! lists them in priority order: the first selector that yields anything wins,
//! later entries are fallbacks, never "try them all and hope".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::driver::{Driver, ElementHandle};
use crate::result::EsperarResult;

/// Selector type for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// CSS selector (e.g., ".address-card, .address-item")
    Css(String),
    /// Test ID selector (data-testid attribute)
    TestId(String),
    /// CSS selector filtered by contained text
    CssWithText {
        /// Base CSS selector
        css: String,
        /// Text content to match (substring, trimmed)
        text: String,
    },
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Create a CSS selector filtered by text content
    #[must_use]
    pub fn css_with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self::CssWithText {
            css: css.into(),
            text: text.into(),
        }
    }

    /// CSS part of the selector, suitable for `querySelectorAll`
    #[must_use]
    pub fn css_part(&self) -> String {
        match self {
            Self::Css(s) | Self::CssWithText { css: s, .. } => s.clone(),
            Self::TestId(id) => format!("[data-testid='{id}']"),
        }
    }

    /// Text filter, if any
    #[must_use]
    pub fn text_filter(&self) -> Option<&str> {
        match self {
            Self::CssWithText { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }

}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::TestId(id) => write!(f, "test-id={id}"),
            Self::CssWithText { css, text } => write!(f, "css={css} text={text:?}"),
        }
    }
}

/// Priority-ordered list of selectors for one semantic concept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorChain {
    selectors: Vec<Selector>,
}

impl SelectorChain {
    /// Create an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain of CSS selectors, highest priority first
    #[must_use]
    pub fn css<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selectors: selectors.into_iter().map(Selector::css).collect(),
        }
    }

    /// Append a lower-priority fallback
    #[must_use]
    pub fn then(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// Selectors in priority order
    pub fn iter(&self) -> std::slice::Iter<'_, Selector> {
        self.selectors.iter()
    }

    /// Number of selectors
    #[must_use]
    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    /// Whether the chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// Page-wide lookup: handles for the first selector that matches anything
    pub fn first_match<D: Driver + ?Sized>(
        &self,
        driver: &D,
    ) -> EsperarResult<Option<(&Selector, Vec<ElementHandle>)>> {
        for selector in &self.selectors {
            let found = driver.find_all(selector)?;
            if !found.is_empty() {
                return Ok(Some((selector, found)));
            }
        }
        Ok(None)
    }

    /// Scoped lookup inside `parent`, same priority rules as [`Self::first_match`]
    pub fn first_within<D: Driver + ?Sized>(
        &self,
        driver: &D,
        parent: &ElementHandle,
    ) -> EsperarResult<Option<ElementHandle>> {
        for selector in &self.selectors {
            if let Some(handle) = driver.find_within(parent, selector)?.into_iter().next() {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    /// All CSS parts, for handing to page-side scripts
    #[must_use]
    pub fn css_list(&self) -> Vec<String> {
        self.selectors.iter().map(Selector::css_part).collect()
    }
}

impl From<Vec<Selector>> for SelectorChain {
    fn from(selectors: Vec<Selector>) -> Self {
        Self { selectors }
    }
}

impl<'a> IntoIterator for &'a SelectorChain {
    type Item = &'a Selector;
    type IntoIter = std::slice::Iter<'a, Selector>;

    fn into_iter(self) -> Self::IntoIter {
        self.selectors.iter()
    }
}
