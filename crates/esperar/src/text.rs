//! Text normalization for label comparison.
//!
//! Rendered labels arrive untrimmed, in arbitrary Unicode composition and with
//! locale-specific diacritics. [`normalize`] reduces them to a canonical form:
//!
//! 1. simple lower-casing (no locale-specific folding)
//! 2. NFD decomposition, then every combining mark is removed
//! 3. whitespace runs (spaces, tabs, newlines) collapse to one ASCII space,
//!    leading and trailing whitespace is dropped
//!
//! The result is idempotent: `normalize(&normalize(x)) == normalize(x)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// A label in canonical comparison form
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedLabel(String);

impl NormalizedLabel {
    /// Normalize a raw label
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    /// Normalize an optional label, `None` yields the empty label
    #[must_use]
    pub fn from_opt(raw: Option<&str>) -> Self {
        raw.map_or_else(Self::default, Self::new)
    }

    /// The normalized text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the label is empty after normalization
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space-delimited tokens, duplicates kept
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ').filter(|t| !t.is_empty())
    }
}

impl fmt::Display for NormalizedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalize free text for comparison. Never fails.
#[must_use]
pub fn normalize(raw: &str) -> String {
    // lower-case first: some lower-case mappings emit combining marks (İ)
    let stripped: String = raw
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`normalize`] over an optional label
#[must_use]
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize).unwrap_or_default()
}
