//! Fuzzy label matching.
//!
//! Four strategies, tried strictest first; the first one that holds decides
//! the [`MatchResult`]:
//!
//! | Strategy              | Holds when                                                 |
//! |-----------------------|------------------------------------------------------------|
//! | `Exact`               | normalized labels are equal                                |
//! | `Substring`           | one normalized label contains the other, and the contained |
//! |                       | side has at least `min_substring_len` chars (default 3)    |
//! | `TokenSuperset`       | every expected token appears in the observed tokens        |
//! | `PartialTokenOverlap` | shared tokens >= `min(min_overlap, expected token count)`  |
//!
//! The length guard narrows plain containment: with the default settings
//! `"Jo"` against `"John"` is a miss, and `"An"` only matches through its
//! tokens. Lower it with [`FuzzyMatcher::with_min_substring_len`].
//!
//! `PartialTokenOverlap` is advisory. Two people sharing a family and middle
//! name overlap on two tokens, so assertions should require
//! [`MatchResult::is_strict`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::text::normalize;

/// Default token overlap for [`MatchStrategy::PartialTokenOverlap`]
pub const DEFAULT_MIN_OVERLAP: usize = 2;

/// Default minimum length of the contained side for [`MatchStrategy::Substring`]
pub const DEFAULT_MIN_SUBSTRING_LEN: usize = 3;

/// Strategy that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// Normalized labels are equal
    Exact,
    /// One normalized label contains the other
    Substring,
    /// Expected tokens are a subset of observed tokens
    TokenSuperset,
    /// Enough tokens in common
    PartialTokenOverlap,
}

impl MatchStrategy {
    /// All strategies, in evaluation order
    pub const ALL: [Self; 4] = [
        Self::Exact,
        Self::Substring,
        Self::TokenSuperset,
        Self::PartialTokenOverlap,
    ];

    /// Exact and Substring are safe for assertions
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        matches!(self, Self::Exact | Self::Substring)
    }

    /// Strategy name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Substring => "substring",
            Self::TokenSuperset => "token_superset",
            Self::PartialTokenOverlap => "partial_token_overlap",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchResult {
    /// Whether any strategy held
    pub matched: bool,
    /// The strategy that held, `None` when unmatched
    pub strategy: Option<MatchStrategy>,
}

impl MatchResult {
    /// A match via `strategy`
    #[must_use]
    pub const fn hit(strategy: MatchStrategy) -> Self {
        Self {
            matched: true,
            strategy: Some(strategy),
        }
    }

    /// No match
    #[must_use]
    pub const fn miss() -> Self {
        Self {
            matched: false,
            strategy: None,
        }
    }

    /// Matched through a strategy safe for assertions
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        match self.strategy {
            Some(strategy) => self.matched && strategy.is_strict(),
            None => false,
        }
    }
}

/// Label matcher with tunable thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzyMatcher {
    /// Shared-token requirement for partial overlap, capped by the expected token count
    pub min_overlap: usize,
    /// Shortest contained label (in chars) accepted by the substring strategy
    pub min_substring_len: usize,
    /// Whether the partial overlap strategy runs at all
    pub allow_partial_overlap: bool,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            min_overlap: DEFAULT_MIN_OVERLAP,
            min_substring_len: DEFAULT_MIN_SUBSTRING_LEN,
            allow_partial_overlap: true,
        }
    }
}

impl FuzzyMatcher {
    /// Matcher with default thresholds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matcher that only accepts Exact and Substring
    #[must_use]
    pub fn strict() -> Self {
        Self {
            allow_partial_overlap: false,
            ..Self::default()
        }
    }

    /// Set the partial overlap threshold
    #[must_use]
    pub const fn with_min_overlap(mut self, min_overlap: usize) -> Self {
        self.min_overlap = min_overlap;
        self
    }

    /// Set the substring length guard
    #[must_use]
    pub const fn with_min_substring_len(mut self, len: usize) -> Self {
        self.min_substring_len = len;
        self
    }

    /// Enable or disable partial overlap
    #[must_use]
    pub const fn with_partial_overlap(mut self, allow: bool) -> Self {
        self.allow_partial_overlap = allow;
        self
    }

    /// Compare an expected label against an observed one
    #[must_use]
    pub fn compare(&self, expected: &str, observed: &str) -> MatchResult {
        let expected = normalize(expected);
        let observed = normalize(observed);
        if expected.is_empty() || observed.is_empty() {
            return MatchResult::miss();
        }

        if expected == observed {
            return MatchResult::hit(MatchStrategy::Exact);
        }

        if self.substring_holds(&expected, &observed) {
            return MatchResult::hit(MatchStrategy::Substring);
        }

        let expected_tokens: BTreeSet<&str> = expected.split(' ').collect();
        let observed_tokens: BTreeSet<&str> = observed.split(' ').collect();

        if expected_tokens.is_subset(&observed_tokens) {
            return MatchResult::hit(MatchStrategy::TokenSuperset);
        }

        if self.allow_partial_overlap {
            let common = expected_tokens.intersection(&observed_tokens).count();
            let required = self.min_overlap.min(expected_tokens.len()).max(1);
            if common >= required {
                return MatchResult::hit(MatchStrategy::PartialTokenOverlap);
            }
        }

        MatchResult::miss()
    }

    /// Shorthand for `compare(..).matched`
    #[must_use]
    pub fn matches(&self, expected: &str, observed: &str) -> bool {
        self.compare(expected, observed).matched
    }

    /// Best observed label for `expected`: strictest strategy wins, ties go
    /// to the earliest candidate. Returns the candidate index and result.
    pub fn best_match<'a, I>(&self, expected: &str, candidates: I) -> Option<(usize, MatchResult)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .enumerate()
            .filter_map(|(i, observed)| {
                let result = self.compare(expected, observed);
                result.strategy.map(|s| (s, i, result))
            })
            .min_by_key(|(strategy, i, _)| (*strategy, *i))
            .map(|(_, i, result)| (i, result))
    }

    fn substring_holds(&self, expected: &str, observed: &str) -> bool {
        let long_enough = |s: &str| s.chars().count() >= self.min_substring_len;
        (long_enough(expected) && observed.contains(expected))
            || (long_enough(observed) && expected.contains(observed))
    }
}

/// Compare with the default matcher
#[must_use]
pub fn match_labels(expected: &str, observed: &str) -> MatchResult {
    FuzzyMatcher::default().compare(expected, observed)
}
