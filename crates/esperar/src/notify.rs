//! Notification capture.
//!
//! Success notifications render and vanish within milliseconds, so sampling
//! the DOM after the action can miss them entirely. The bridge therefore arms
//! a page-side `MutationObserver` *before* the action and polls for what it
//! recorded. When the observer cannot be armed or never reports, a chain of
//! bounded poll-based stages takes over:
//!
//! ```text
//!   arm ──► action ──► resolve ──► EventBridge
//!    │ (fails)            │ (timeout / superseded)
//!    ▼                    ▼
//!   PollVisible (visibility_ms) ──► PollPresent (presence_ms)
//!        ──► BodyScan (body_scan_ms, every body_scan_interval_ms) ──► None
//! ```
//!
//! Page-side state lives under `window[namespace]` and is tagged with a
//! per-capture token. Arming tears down whatever an earlier capture left
//! behind, and reading the captured text clears it, so a stale notification
//! from a previous action can never satisfy the next one.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::driver::{Driver, ElementHandle};
use crate::locator::{Selector, SelectorChain};
use crate::result::{EsperarError, EsperarResult};
use crate::wait::{duration_ms, WaitOptions, Waiter};

// =============================================================================
// PAGE-SIDE SCRIPTS
// =============================================================================

/// Installs the observer. Args: `[namespace, token, selectors]`.
pub const ARM_SCRIPT: &str = r#"
const [ns, token, selectors] = arguments;
const prev = window[ns];
if (prev && prev.observer) { try { prev.observer.disconnect(); } catch (e) {} }
const state = { token: token, captured: null, done: false, observer: null };
window[ns] = state;
const read = (el) => (el.innerText || el.textContent || '').trim();
const observer = new MutationObserver((mutations) => {
  if (state.done) return;
  for (const m of mutations) {
    for (const node of m.addedNodes) {
      if (node.nodeType !== 1) continue;
      for (const sel of selectors) {
        let found = null;
        try { found = node.matches(sel) ? node : node.querySelector(sel); } catch (e) {}
        if (found) {
          state.captured = read(found);
          state.done = true;
          observer.disconnect();
          return;
        }
      }
    }
  }
});
state.observer = observer;
observer.observe(document.body, { childList: true, subtree: true });
return true;
"#;

/// `true` once captured, `false` while pending, `null` if superseded.
/// Args: `[namespace, token]`.
pub const PENDING_SCRIPT: &str = r"
const [ns, token] = arguments;
const state = window[ns];
if (!state || state.token !== token) return null;
return state.done;
";

/// Reads the captured text, then clears and disconnects. Args: `[namespace, token]`.
pub const TAKE_SCRIPT: &str = r"
const [ns, token] = arguments;
const state = window[ns];
if (!state || state.token !== token) return null;
const text = state.captured;
try { if (state.observer) state.observer.disconnect(); } catch (e) {}
delete window[ns];
return text;
";

/// Tears the observer down if it still belongs to `token`. Args: `[namespace, token]`.
pub const DISARM_SCRIPT: &str = r"
const [ns, token] = arguments;
const state = window[ns];
if (state && state.token === token) {
  try { if (state.observer) state.observer.disconnect(); } catch (e) {}
  delete window[ns];
}
return true;
";

/// One-shot async observer. Args: `[selector, timeout_ms, callback]`.
pub const OBSERVE_ONCE_SCRIPT: &str = r"
const selector = arguments[0];
const timeout = arguments[1] || 5000;
const done = arguments[arguments.length - 1];
let settled = false;
const finish = (value) => { if (!settled) { settled = true; done(value); } };
const read = (el) => (el.innerText || el.textContent || '').trim();
try {
  const existing = document.querySelector(selector);
  if (existing) { finish(read(existing)); return; }
  const observer = new MutationObserver((mutations) => {
    for (const m of mutations) {
      for (const node of m.addedNodes) {
        if (node.nodeType !== 1) continue;
        try {
          const found = node.matches(selector) ? node : node.querySelector(selector);
          if (found) { observer.disconnect(); finish(read(found)); return; }
        } catch (e) {}
      }
    }
  });
  observer.observe(document.body, { childList: true, subtree: true });
  setTimeout(() => { try { observer.disconnect(); } catch (e) {} finish(null); }, timeout);
} catch (e) { finish(null); }
";

// =============================================================================
// CAPTURE TYPES
// =============================================================================

/// Strategy that produced a [`NotificationCapture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationSource {
    /// Page-side observer
    EventBridge,
    /// Visible element in the selector chain
    PollVisible,
    /// Present but not necessarily visible element
    PollPresent,
    /// Keyword hit in the page text
    BodyScan,
    /// Nothing found
    None,
}

impl fmt::Display for NotificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EventBridge => "event_bridge",
            Self::PollVisible => "poll_visible",
            Self::PollPresent => "poll_present",
            Self::BodyScan => "body_scan",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Captured notification text, fresh per action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationCapture {
    /// Notification text, `None` when nothing was found
    pub text: Option<String>,
    /// How it was found
    pub source: NotificationSource,
}

impl NotificationCapture {
    /// A capture with text
    #[must_use]
    pub fn found(text: impl Into<String>, source: NotificationSource) -> Self {
        Self {
            text: Some(text.into()),
            source,
        }
    }

    /// Nothing found
    #[must_use]
    pub const fn none() -> Self {
        Self {
            text: None,
            source: NotificationSource::None,
        }
    }

    /// Whether any strategy produced text
    #[must_use]
    pub const fn is_captured(&self) -> bool {
        self.text.is_some()
    }

    /// Case-insensitive check for any of `keywords` in the captured text
    #[must_use]
    pub fn contains_any(&self, keywords: &[&str]) -> bool {
        self.text.as_deref().is_some_and(|text| {
            let lower = text.to_lowercase();
            keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
        })
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Notification capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Window property holding page-side observer state
    pub namespace: String,
    /// Selectors the observer watches for
    pub subscription_selectors: SelectorChain,
    /// Poll-stage selectors, highest priority first
    pub selectors: SelectorChain,
    /// Body-scan keywords (case-insensitive)
    pub keywords: Vec<String>,
    /// Interval for polling the armed observer
    pub bridge_poll_interval_ms: u64,
    /// Visibility stage budget
    pub visibility_ms: u64,
    /// Presence stage budget
    pub presence_ms: u64,
    /// Poll interval inside the visibility and presence stages
    pub stage_poll_interval_ms: u64,
    /// Body scan budget
    pub body_scan_ms: u64,
    /// Body scan poll interval
    pub body_scan_interval_ms: u64,
    /// Characters kept before a keyword hit
    pub snippet_before: usize,
    /// Characters kept from the keyword hit onward
    pub snippet_after: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            namespace: String::from("__esperarToast"),
            subscription_selectors: SelectorChain::css([
                ".Toastify__toast",
                ".Toastify__toast-body",
                "[role='alert']",
                ".toast",
                ".notification",
                ".alert-success",
                "[aria-live='polite']",
                "[aria-live='assertive']",
            ]),
            selectors: SelectorChain::css([
                ".Toastify__toast--success .Toastify__toast-body",
                ".Toastify__toast .Toastify__toast-body",
                "[role='alert']",
                "[aria-live='polite']",
                "[aria-live='assertive']",
                ".toast, .toast-message, .notification, .notification-message, .alert-success",
            ]),
            keywords: ["success", "successfully", "thành công", "đã thêm", "saved"]
                .into_iter()
                .map(String::from)
                .collect(),
            bridge_poll_interval_ms: 100,
            visibility_ms: 2_000,
            presence_ms: 1_000,
            stage_poll_interval_ms: 100,
            body_scan_ms: 4_000,
            body_scan_interval_ms: 300,
            snippet_before: 40,
            snippet_after: 80,
        }
    }
}

impl NotificationConfig {
    /// Create with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll-stage selector chain
    #[must_use]
    pub fn with_selectors(mut self, selectors: SelectorChain) -> Self {
        self.selectors = selectors;
        self
    }

    /// Set the body-scan keywords
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set the three fallback budgets in milliseconds
    #[must_use]
    pub const fn with_stage_budgets(mut self, visibility_ms: u64, presence_ms: u64, body_scan_ms: u64) -> Self {
        self.visibility_ms = visibility_ms;
        self.presence_ms = presence_ms;
        self.body_scan_ms = body_scan_ms;
        self
    }

    /// Set the stage and body-scan poll intervals in milliseconds
    #[must_use]
    pub const fn with_poll_intervals(mut self, stage_ms: u64, body_scan_ms: u64) -> Self {
        self.stage_poll_interval_ms = stage_ms;
        self.body_scan_interval_ms = body_scan_ms;
        self
    }

    /// Worst-case time spent in the fallback chain
    #[must_use]
    pub const fn fallback_budget(&self) -> Duration {
        Duration::from_millis(self.visibility_ms + self.presence_ms + self.body_scan_ms)
    }

    fn keyword_regex(&self) -> EsperarResult<Option<Regex>> {
        let alternatives: Vec<String> = self
            .keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| regex::escape(k))
            .collect();
        if alternatives.is_empty() {
            return Ok(None);
        }
        RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()
            .map(Some)
            .map_err(|e| EsperarError::config(format!("keyword pattern: {e}")))
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// An armed page-side observer, owned for the duration of one capture.
///
/// Dropping the subscription disarms it. Disarming twice is a no-op.
pub struct Subscription<'d, D: Driver + ?Sized> {
    driver: &'d D,
    namespace: String,
    token: String,
    armed: Cell<bool>,
}

impl<D: Driver + ?Sized> fmt::Debug for Subscription<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("namespace", &self.namespace)
            .field("token", &self.token)
            .field("armed", &self.armed.get())
            .finish_non_exhaustive()
    }
}

impl<'d, D: Driver + ?Sized> Subscription<'d, D> {
    /// Token scoping this capture's page-side state
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the observer is still installed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.get()
    }

    fn args(&self) -> [Value; 2] {
        [json!(self.namespace), json!(self.token)]
    }

    /// Check once for a captured notification.
    ///
    /// On capture the page-side state is read, cleared and torn down. Returns
    /// `StaleResource` when a later `arm` replaced this subscription.
    pub fn poll(&self) -> EsperarResult<Option<String>> {
        if !self.armed.get() {
            return Err(EsperarError::stale(format!(
                "subscription {} already consumed",
                self.token
            )));
        }
        match self.driver.execute(PENDING_SCRIPT, &self.args())? {
            Value::Bool(false) => Ok(None),
            Value::Bool(true) => {
                let taken = self.driver.execute(TAKE_SCRIPT, &self.args())?;
                self.armed.set(false);
                match taken {
                    Value::String(text) => Ok(Some(text.trim().to_string())),
                    Value::Null => Err(EsperarError::stale(format!(
                        "subscription {} superseded",
                        self.token
                    ))),
                    other => Ok(Some(other.to_string())),
                }
            }
            _ => {
                self.armed.set(false);
                Err(EsperarError::stale(format!(
                    "subscription {} superseded",
                    self.token
                )))
            }
        }
    }

    /// Tear the observer down. Idempotent.
    pub fn disarm(&self) -> EsperarResult<()> {
        if !self.armed.replace(false) {
            return Ok(());
        }
        self.driver.execute(DISARM_SCRIPT, &self.args()).map(|_| ())
    }
}

impl<D: Driver + ?Sized> Drop for Subscription<'_, D> {
    fn drop(&mut self) {
        if let Err(err) = self.disarm() {
            tracing::debug!(token = %self.token, error = %err, "disarm on drop failed");
        }
    }
}

// =============================================================================
// BRIDGE
// =============================================================================

/// Captures short-lived notifications around a state-changing action
pub struct NotificationBridge<'d, D: Driver + ?Sized> {
    driver: &'d D,
    config: NotificationConfig,
}

impl<D: Driver + ?Sized> fmt::Debug for NotificationBridge<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBridge")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'d, D: Driver + ?Sized> NotificationBridge<'d, D> {
    /// Bridge with default configuration
    #[must_use]
    pub fn new(driver: &'d D) -> Self {
        Self::with_config(driver, NotificationConfig::default())
    }

    /// Bridge with custom configuration
    #[must_use]
    pub fn with_config(driver: &'d D, config: NotificationConfig) -> Self {
        Self { driver, config }
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Install a fresh observer, replacing any earlier one on this page
    pub fn arm(&self) -> EsperarResult<Subscription<'d, D>> {
        let token = Uuid::new_v4().to_string();
        let args = [
            json!(self.config.namespace),
            json!(token),
            json!(self.config.subscription_selectors.css_list()),
        ];
        match self.driver.execute(ARM_SCRIPT, &args)? {
            Value::Bool(true) => {
                tracing::debug!(token = %token, "notification observer armed");
                Ok(Subscription {
                    driver: self.driver,
                    namespace: self.config.namespace.clone(),
                    token,
                    armed: Cell::new(true),
                })
            }
            other => Err(EsperarError::script(format!(
                "observer install returned {other}"
            ))),
        }
    }

    /// Poll an armed subscription until it reports or `timeout` elapses
    pub fn resolve(
        &self,
        subscription: &Subscription<'_, D>,
        timeout: Duration,
    ) -> EsperarResult<Option<String>> {
        let waiter = Waiter::with_options(
            WaitOptions::new()
                .with_timeout(duration_ms(timeout))
                .with_poll_interval(self.config.bridge_poll_interval_ms),
        );
        let outcome = waiter.until("notification subscription", || subscription.poll())?;
        Ok(outcome.into_value())
    }

    /// Arm, run `action`, then resolve; falls back to polling stages if the
    /// observer could not be armed or never reported.
    ///
    /// Only an error from `action` itself is returned as `Err`.
    pub fn capture_around<F>(&self, action: F, timeout: Duration) -> EsperarResult<NotificationCapture>
    where
        F: FnOnce() -> EsperarResult<()>,
    {
        let subscription = match self.arm() {
            Ok(sub) => Some(sub),
            Err(err) => {
                tracing::warn!(error = %err, "observer unavailable, will fall back to polling");
                None
            }
        };

        action()?;

        if let Some(sub) = subscription {
            match self.resolve(&sub, timeout) {
                Ok(Some(text)) if !text.is_empty() => {
                    tracing::info!(source = "event_bridge", text = %text, "notification captured");
                    return Ok(NotificationCapture::found(text, NotificationSource::EventBridge));
                }
                Ok(_) => tracing::debug!("observer reported nothing in time"),
                Err(err) => tracing::debug!(error = %err, "observer resolve failed"),
            }
        }

        Ok(self.fallback())
    }

    /// Capture without arming first: a one-shot async observer, then the
    /// fallback chain. Never fails.
    pub fn capture(&self, timeout: Duration) -> NotificationCapture {
        let selector = self.config.subscription_selectors.css_list().join(", ");
        let args = [json!(selector), json!(duration_ms(timeout))];
        match self
            .driver
            .evaluate_async(OBSERVE_ONCE_SCRIPT, &args, timeout)
        {
            Ok(Some(Value::String(text))) if !text.trim().is_empty() => {
                let text = text.trim().to_string();
                tracing::info!(source = "event_bridge", text = %text, "notification captured");
                return NotificationCapture::found(text, NotificationSource::EventBridge);
            }
            Ok(_) => tracing::debug!("one-shot observer saw nothing"),
            Err(err) => tracing::debug!(error = %err, "one-shot observer failed"),
        }
        self.fallback()
    }

    /// Run the poll-based stages in order
    pub fn fallback(&self) -> NotificationCapture {
        let start = Instant::now();
        let stages: [(NotificationSource, fn(&Self) -> EsperarResult<Option<String>>); 3] = [
            (NotificationSource::PollVisible, Self::poll_visible),
            (NotificationSource::PollPresent, Self::poll_present),
            (NotificationSource::BodyScan, Self::body_scan),
        ];

        for (source, stage) in stages {
            tracing::debug!(stage = %source, "fallback stage start");
            match stage(self) {
                Ok(Some(text)) => {
                    tracing::info!(
                        stage = %source,
                        elapsed_ms = duration_ms(start.elapsed()),
                        text = %text,
                        "notification captured"
                    );
                    return NotificationCapture::found(text, source);
                }
                Ok(None) => tracing::debug!(stage = %source, "fallback stage exhausted"),
                Err(err) => tracing::warn!(stage = %source, error = %err, "fallback stage failed"),
            }
        }

        tracing::info!(
            elapsed_ms = duration_ms(start.elapsed()),
            "no notification found"
        );
        NotificationCapture::none()
    }

    fn poll_visible(&self) -> EsperarResult<Option<String>> {
        self.poll_chain("visible notification", self.config.visibility_ms, true)
    }

    fn poll_present(&self) -> EsperarResult<Option<String>> {
        self.poll_chain("present notification", self.config.presence_ms, false)
    }

    fn poll_chain(&self, what: &str, budget_ms: u64, require_visible: bool) -> EsperarResult<Option<String>> {
        let waiter = Waiter::with_options(
            WaitOptions::new()
                .with_timeout(budget_ms)
                .with_poll_interval(self.config.stage_poll_interval_ms),
        );
        let outcome = waiter.until(what, || {
            for selector in &self.config.selectors {
                let handles = match self.driver.find_all(selector) {
                    Ok(handles) => handles,
                    Err(err) => {
                        tracing::debug!(selector = %selector, error = %err, "selector skipped");
                        continue;
                    }
                };
                for handle in &handles {
                    match self.read_candidate(handle, require_visible) {
                        Ok(Some(text)) => {
                            tracing::debug!(selector = %selector, "notification element matched");
                            return Ok(Some(text));
                        }
                        Ok(None) => {}
                        Err(err) if err.is_stale() => {}
                        Err(err) => tracing::debug!(selector = %selector, error = %err, "candidate skipped"),
                    }
                }
            }
            Ok(None)
        })?;
        Ok(outcome.into_value())
    }

    fn read_candidate(&self, handle: &ElementHandle, require_visible: bool) -> EsperarResult<Option<String>> {
        if require_visible && !self.driver.is_displayed(handle)? {
            return Ok(None);
        }
        let text = self.driver.text(handle)?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }

    fn body_scan(&self) -> EsperarResult<Option<String>> {
        let Some(pattern) = self.config.keyword_regex()? else {
            return Ok(None);
        };
        let body = Selector::css("body");
        let waiter = Waiter::with_options(
            WaitOptions::new()
                .with_timeout(self.config.body_scan_ms)
                .with_poll_interval(self.config.body_scan_interval_ms),
        );
        let outcome = waiter.until("notification keyword", || {
            let Some(handle) = self.driver.find_all(&body)?.into_iter().next() else {
                return Ok(None);
            };
            let text = match self.driver.text(&handle) {
                Ok(text) => text,
                Err(err) if err.is_stale() => return Ok(None),
                Err(err) => return Err(err),
            };
            Ok(keyword_snippet(
                &pattern,
                &text,
                self.config.snippet_before,
                self.config.snippet_after,
            ))
        })?;
        Ok(outcome.into_value())
    }
}

/// Text window around the first keyword hit: `before` chars ahead of the hit,
/// `after` chars from the hit onward, trimmed.
pub fn keyword_snippet(pattern: &Regex, text: &str, before: usize, after: usize) -> Option<String> {
    let hit = pattern.find(text)?;
    let hit_char = text[..hit.start()].chars().count();
    let start = hit_char.saturating_sub(before);
    let snippet: String = text
        .chars()
        .skip(start)
        .take(hit_char - start + after)
        .collect();
    let snippet = snippet.trim();
    (!snippet.is_empty()).then(|| snippet.to_string())
}
