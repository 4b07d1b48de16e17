//! Form validation messages.
//!
//! Validation errors are rendered with several class conventions. The probe
//! walks the error chain in priority order and returns the texts of the first
//! convention that yields any non-empty message, scoped to the form container
//! when one is present.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::driver::{Driver, ElementHandle};
use crate::locator::SelectorChain;
use crate::result::EsperarResult;
use crate::wait::{duration_ms, WaitOptions, WaitOutcome, Waiter};

/// Where validation messages are looked up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldErrorConfig {
    /// Form container; page-wide lookup when none matches
    pub scope: SelectorChain,
    /// Message elements, highest priority first
    pub errors: SelectorChain,
}

impl Default for FieldErrorConfig {
    fn default() -> Self {
        Self {
            scope: SelectorChain::css(["div.bg-white.p-8"]),
            errors: SelectorChain::css([
                ".pl025.text-critical",
                ".field-error",
                ".error-message",
                ".text-danger",
                ".text-critical",
            ]),
        }
    }
}

/// Reads validation messages through the driver
pub struct FieldErrorProbe<'d, D: Driver + ?Sized> {
    driver: &'d D,
    config: FieldErrorConfig,
    wait: WaitOptions,
}

impl<D: Driver + ?Sized> fmt::Debug for FieldErrorProbe<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldErrorProbe")
            .field("config", &self.config)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl<'d, D: Driver + ?Sized> FieldErrorProbe<'d, D> {
    /// Probe with default selectors
    #[must_use]
    pub fn new(driver: &'d D) -> Self {
        Self::with_config(driver, FieldErrorConfig::default())
    }

    /// Probe with custom selectors
    #[must_use]
    pub fn with_config(driver: &'d D, config: FieldErrorConfig) -> Self {
        Self {
            driver,
            config,
            wait: WaitOptions::default(),
        }
    }

    /// Polling options; the timeout comes from each call
    #[must_use]
    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Current non-empty messages, trimmed, in document order
    pub fn messages(&self) -> EsperarResult<Vec<String>> {
        let scope = self.scope()?;
        for selector in &self.config.errors {
            let handles = match &scope {
                Some(container) => self.driver.find_within(container, selector)?,
                None => self.driver.find_all(selector)?,
            };
            let mut texts = Vec::with_capacity(handles.len());
            for handle in &handles {
                match self.driver.text(handle) {
                    Ok(text) if !text.trim().is_empty() => texts.push(text.trim().to_string()),
                    Ok(_) => {}
                    Err(err) if err.is_stale() => {}
                    Err(err) => return Err(err),
                }
            }
            if !texts.is_empty() {
                tracing::debug!(selector = %selector, count = texts.len(), "field errors");
                return Ok(texts);
            }
        }
        Ok(Vec::new())
    }

    /// Wait until at least `count` messages are shown
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> WaitOutcome<Vec<String>> {
        let start = Instant::now();
        let waiter = Waiter::with_options(self.wait.clone().with_timeout(duration_ms(timeout)));
        let outcome = waiter.until("field errors", || {
            let messages = match self.messages() {
                Ok(messages) => messages,
                Err(err) if err.is_stale() => return Ok(None),
                Err(err) => return Err(err),
            };
            Ok((messages.len() >= count.max(1)).then_some(messages))
        });
        outcome.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "field error wait aborted");
            WaitOutcome::timed_out(start.elapsed())
        })
    }

    /// Wait until any message is shown
    pub fn wait_for_any(&self, timeout: Duration) -> WaitOutcome<Vec<String>> {
        self.wait_for_count(1, timeout)
    }

    fn scope(&self) -> EsperarResult<Option<ElementHandle>> {
        Ok(self
            .config
            .scope
            .first_match(self.driver)?
            .and_then(|(_, handles)| handles.into_iter().next()))
    }
}
