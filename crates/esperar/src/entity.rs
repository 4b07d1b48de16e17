//! Entity card resolution.
//!
//! An entity card is one rendered record in a list (an address, a payment
//! method). The resolver enumerates containers through a selector chain,
//! extracts sub-fields, and skips fragments that match the container pattern
//! without carrying the summary sub-structure.
//!
//! [`EntityCard`] is a snapshot, not a live object. Nothing here keeps an
//! [`ElementHandle`] across calls: every query re-resolves from the DOM, and
//! cards are addressed by their positional `index` in a fresh container list.
//!
//! ## Default detection
//!
//! 1. **Flagged**: the container carries one of the [`DefaultFlag`] markers.
//! 2. **Inferred**: a structurally complete card without a promote affordance
//!    ("Make default") is taken to be the default already.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::driver::{Driver, ElementHandle};
use crate::locator::{Selector, SelectorChain};
use crate::matcher::{FuzzyMatcher, MatchResult};
use crate::result::{EsperarError, EsperarResult};

/// Marker signalling that a card is the default one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultFlag {
    /// The `class` attribute contains this substring
    ClassContains(String),
    /// The attribute is present and, when `value` is set, equal to it.
    /// Without `value`, `"false"` counts as absent.
    Attribute {
        /// Attribute name
        name: String,
        /// Required value
        #[serde(default)]
        value: Option<String>,
    },
}

impl DefaultFlag {
    /// Class substring flag
    #[must_use]
    pub fn class_contains(fragment: impl Into<String>) -> Self {
        Self::ClassContains(fragment.into())
    }

    /// Attribute presence flag
    #[must_use]
    pub fn attribute(name: impl Into<String>) -> Self {
        Self::Attribute {
            name: name.into(),
            value: None,
        }
    }

    fn holds<D: Driver + ?Sized>(&self, driver: &D, container: &ElementHandle) -> EsperarResult<bool> {
        match self {
            Self::ClassContains(fragment) => Ok(driver
                .attribute(container, "class")?
                .is_some_and(|class| class.contains(fragment.as_str()))),
            Self::Attribute { name, value } => {
                let actual = driver.attribute(container, name)?;
                Ok(match (actual, value) {
                    (Some(actual), Some(expected)) => &actual == expected,
                    (Some(actual), None) => !actual.eq_ignore_ascii_case("false"),
                    (None, _) => false,
                })
            }
        }
    }
}

/// Markup conventions for one kind of entity list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMarkup {
    /// Card containers; the first selector yielding anything is used
    pub cards: SelectorChain,
    /// Sub-structure that every complete card carries
    pub summary: Selector,
    /// Name field, highest priority first
    pub name: SelectorChain,
    /// Phone field, highest priority first
    pub phone: SelectorChain,
    /// Tier-1 default markers, checked in order
    pub default_flags: Vec<DefaultFlag>,
    /// Affordance that promotes a card to default
    pub promote: Selector,
}

impl Default for EntityMarkup {
    fn default() -> Self {
        Self {
            cards: SelectorChain::css([".address-card, .address-item, .border.rounded"]),
            summary: Selector::css(".address__summary"),
            name: SelectorChain::css([".address__summary .full-name", ".full-name"]),
            phone: SelectorChain::css([".address__summary .telephone", ".telephone"]),
            default_flags: vec![
                DefaultFlag::class_contains("border-green-700"),
                DefaultFlag::class_contains("default"),
                DefaultFlag::attribute("data-default"),
            ],
            promote: Selector::css_with_text("a", "Make default"),
        }
    }
}

impl EntityMarkup {
    /// Create with the address-book defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container chain
    #[must_use]
    pub fn with_cards(mut self, cards: SelectorChain) -> Self {
        self.cards = cards;
        self
    }

    /// Set the summary selector
    #[must_use]
    pub fn with_summary(mut self, summary: Selector) -> Self {
        self.summary = summary;
        self
    }

    /// Set the name chain
    #[must_use]
    pub fn with_name(mut self, name: SelectorChain) -> Self {
        self.name = name;
        self
    }

    /// Set the phone chain
    #[must_use]
    pub fn with_phone(mut self, phone: SelectorChain) -> Self {
        self.phone = phone;
        self
    }

    /// Set the tier-1 default markers
    #[must_use]
    pub fn with_default_flags(mut self, flags: Vec<DefaultFlag>) -> Self {
        self.default_flags = flags;
        self
    }

    /// Set the promote affordance
    #[must_use]
    pub fn with_promote(mut self, promote: Selector) -> Self {
        self.promote = promote;
        self
    }
}

/// Snapshot of one rendered card
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityCard {
    /// Position in the container list at resolution time
    pub index: usize,
    /// Name label as rendered, trimmed
    pub name: String,
    /// Phone label as rendered, trimmed
    pub phone: String,
    /// Carries an explicit default marker
    pub is_default: bool,
    /// Exposes the promote affordance
    pub has_default_action: bool,
}

impl EntityCard {
    /// Flagged default, or inferred from a missing promote affordance
    #[must_use]
    pub const fn looks_default(&self) -> bool {
        self.is_default || !self.has_default_action
    }
}

impl fmt::Display for EntityCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}", self.index, self.name)?;
        if self.is_default {
            write!(f, " [default]")?;
        }
        Ok(())
    }
}

/// Enumerates entity cards through the driver
pub struct EntitySetResolver<'d, D: Driver + ?Sized> {
    driver: &'d D,
    markup: EntityMarkup,
    matcher: FuzzyMatcher,
}

impl<D: Driver + ?Sized> fmt::Debug for EntitySetResolver<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySetResolver")
            .field("markup", &self.markup)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

impl<'d, D: Driver + ?Sized> EntitySetResolver<'d, D> {
    /// Resolver with default markup and matcher
    #[must_use]
    pub fn new(driver: &'d D) -> Self {
        Self::with_markup(driver, EntityMarkup::default())
    }

    /// Resolver with custom markup
    #[must_use]
    pub fn with_markup(driver: &'d D, markup: EntityMarkup) -> Self {
        Self {
            driver,
            markup,
            matcher: FuzzyMatcher::default(),
        }
    }

    /// Replace the matcher used for name lookups
    #[must_use]
    pub fn with_matcher(mut self, matcher: FuzzyMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Underlying driver
    #[must_use]
    pub const fn driver(&self) -> &'d D {
        self.driver
    }

    /// Markup in use
    #[must_use]
    pub const fn markup(&self) -> &EntityMarkup {
        &self.markup
    }

    /// Matcher in use
    #[must_use]
    pub const fn matcher(&self) -> &FuzzyMatcher {
        &self.matcher
    }

    /// Fresh container handles, complete or not
    pub fn containers(&self) -> EsperarResult<Vec<ElementHandle>> {
        Ok(self
            .markup
            .cards
            .first_match(self.driver)?
            .map(|(_, handles)| handles)
            .unwrap_or_default())
    }

    /// Structurally complete cards in document order.
    ///
    /// Malformed fragments are skipped. A container going stale mid-scan
    /// returns `StaleResource` so the caller can rescan.
    pub fn list(&self) -> EsperarResult<Vec<EntityCard>> {
        let containers = self.containers()?;
        let mut cards = Vec::with_capacity(containers.len());
        for (index, container) in containers.iter().enumerate() {
            match self.read_card(index, container) {
                Ok(card) => cards.push(card),
                Err(err @ EsperarError::MalformedState { .. }) => {
                    tracing::debug!(index, error = %err, "skipping malformed card");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(cards)
    }

    /// The default card: flagged first, then inferred
    pub fn find_default(&self) -> EsperarResult<Option<EntityCard>> {
        let cards = self.list()?;
        if let Some(card) = cards.iter().find(|c| c.is_default) {
            tracing::debug!(index = card.index, tier = 1, "default card found");
            return Ok(Some(card.clone()));
        }
        let inferred = cards.into_iter().find(|c| !c.has_default_action);
        if let Some(card) = &inferred {
            tracing::debug!(index = card.index, tier = 2, "default card inferred");
        }
        Ok(inferred)
    }

    /// Number of complete cards
    pub fn count(&self) -> EsperarResult<usize> {
        let containers = self.containers()?;
        let mut complete = 0;
        for container in &containers {
            match self.driver.find_within(container, &self.markup.summary) {
                Ok(found) if !found.is_empty() => complete += 1,
                Ok(_) => {}
                Err(err) if err.is_stale() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(complete)
    }

    /// Number of containers, including malformed ones
    pub fn raw_count(&self) -> EsperarResult<usize> {
        Ok(self.containers()?.len())
    }

    /// Displayed, non-empty name labels across the page
    pub fn visible_names(&self) -> EsperarResult<Vec<String>> {
        let Some((_, handles)) = self.markup.name.first_match(self.driver)? else {
            return Ok(Vec::new());
        };
        let mut names = Vec::with_capacity(handles.len());
        for handle in &handles {
            match self.read_visible_text(handle) {
                Ok(Some(name)) => names.push(name),
                Ok(None) => {}
                Err(err) if err.is_stale() => {}
                Err(err) => return Err(err),
            }
        }
        tracing::debug!(?names, "visible names");
        Ok(names)
    }

    /// Re-resolve the card at `index`. `Ok(None)` when out of range.
    pub fn card_at(&self, index: usize) -> EsperarResult<Option<EntityCard>> {
        let containers = self.containers()?;
        containers
            .get(index)
            .map(|container| self.read_card(index, container))
            .transpose()
    }

    /// Best-matching card for `expected`: stricter strategy first, then
    /// document order
    pub fn find_by_name(&self, expected: &str) -> EsperarResult<Option<(EntityCard, MatchResult)>> {
        let cards = self.list()?;
        let best = self
            .matcher
            .best_match(expected, cards.iter().map(|c| c.name.as_str()));
        Ok(best.and_then(|(i, result)| cards.into_iter().nth(i).map(|card| (card, result))))
    }

    /// Whether the card at `index` is default, flagged or inferred
    pub fn is_default_at(&self, index: usize) -> EsperarResult<bool> {
        self.card_at(index)?
            .map(|card| card.looks_default())
            .ok_or_else(|| EsperarError::stale(format!("card index {index} out of range")))
    }

    /// Click the promote affordance inside the card at `index`.
    ///
    /// Returns `false` when the index is out of range or the card has no
    /// affordance.
    pub fn promote_at(&self, index: usize) -> EsperarResult<bool> {
        let containers = self.containers()?;
        let Some(container) = containers.get(index) else {
            tracing::debug!(index, "promote target out of range");
            return Ok(false);
        };
        let Some(action) = self
            .driver
            .find_within(container, &self.markup.promote)?
            .into_iter()
            .next()
        else {
            return Ok(false);
        };
        self.driver.click(&action)?;
        tracing::info!(index, "promote affordance clicked");
        Ok(true)
    }

    /// Promote the first card whose name strictly matches `expected`
    pub fn promote_by_name(&self, expected: &str) -> EsperarResult<bool> {
        let target = self.list()?.into_iter().find(|card| {
            card.has_default_action && self.matcher.compare(expected, &card.name).is_strict()
        });
        match target {
            Some(card) => self.promote_at(card.index),
            None => Ok(false),
        }
    }

    fn read_card(&self, index: usize, container: &ElementHandle) -> EsperarResult<EntityCard> {
        if self
            .driver
            .find_within(container, &self.markup.summary)?
            .is_empty()
        {
            return Err(EsperarError::malformed(format!(
                "card {index} lacks {}",
                self.markup.summary
            )));
        }
        let name = self.field_text(container, &self.markup.name)?;
        let phone = self.field_text(container, &self.markup.phone)?;

        let mut is_default = false;
        for flag in &self.markup.default_flags {
            if flag.holds(self.driver, container)? {
                is_default = true;
                break;
            }
        }

        let has_default_action = !self
            .driver
            .find_within(container, &self.markup.promote)?
            .is_empty();

        Ok(EntityCard {
            index,
            name,
            phone,
            is_default,
            has_default_action,
        })
    }

    fn field_text(&self, container: &ElementHandle, chain: &SelectorChain) -> EsperarResult<String> {
        match chain.first_within(self.driver, container)? {
            Some(handle) => Ok(self.driver.text(&handle)?.trim().to_string()),
            None => Ok(String::new()),
        }
    }

    fn read_visible_text(&self, handle: &ElementHandle) -> EsperarResult<Option<String>> {
        if !self.driver.is_displayed(handle)? {
            return Ok(None);
        }
        let text = self.driver.text(handle)?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}
