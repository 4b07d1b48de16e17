//! Bounded condition polling.
//!
//! [`Waiter::until`] evaluates a predicate until it yields a value, the
//! timeout elapses, or the predicate reports a non-transient error.
//!
//! | Predicate returns          | Waiter does                               |
//! |----------------------------|-------------------------------------------|
//! | `Ok(Some(v))`              | stop, `WaitOutcome { success: true }`     |
//! | `Ok(None)`                 | keep polling                              |
//! | `Err(NotReady)`            | keep polling                              |
//! | `Err(StaleResource)`       | stop, propagate so the caller re-resolves |
//! | any other `Err`            | stop, propagate                           |
//! | timeout elapsed            | `WaitOutcome { success: false }`          |
//!
//! Polling is single-threaded: the calling thread sleeps between checks and
//! never sleeps past the deadline.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::result::EsperarResult;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default timeout for wait operations (10 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Default polling interval (200ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Default ceiling for backed-off poll intervals (2 seconds)
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 2_000;

// =============================================================================
// WAIT OPTIONS
// =============================================================================

/// Options for wait operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Interval multiplier applied after each unsuccessful poll (1.0 = fixed)
    pub backoff: f64,
    /// Ceiling for the backed-off interval in milliseconds
    pub max_poll_interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            backoff: 1.0,
            max_poll_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Grow the interval by `multiplier` after each miss, up to `max_ms`
    #[must_use]
    pub fn with_backoff(mut self, multiplier: f64, max_ms: u64) -> Self {
        self.backoff = multiplier;
        self.max_poll_interval_ms = max_ms;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn next_interval_ms(&self, current_ms: u64) -> u64 {
        if !(self.backoff.is_finite() && self.backoff > 1.0) {
            return current_ms;
        }
        let ceiling = self.max_poll_interval_ms.max(self.poll_interval_ms);
        let grown = (current_ms.max(1) as f64) * self.backoff;
        if grown >= ceiling as f64 {
            ceiling
        } else {
            grown as u64
        }
    }
}

// =============================================================================
// WAIT OUTCOME
// =============================================================================

/// Result of a bounded wait. Elapsed time is reported even on timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitOutcome<T> {
    /// Whether the condition was met in time
    pub success: bool,
    /// The value the predicate produced
    pub value: Option<T>,
    /// Time spent waiting
    pub elapsed_ms: u64,
}

impl<T> WaitOutcome<T> {
    /// Create a successful outcome
    #[must_use]
    pub fn succeeded(value: T, elapsed: Duration) -> Self {
        Self {
            success: true,
            value: Some(value),
            elapsed_ms: duration_ms(elapsed),
        }
    }

    /// Create a timeout outcome
    #[must_use]
    pub fn timed_out(elapsed: Duration) -> Self {
        Self {
            success: false,
            value: None,
            elapsed_ms: duration_ms(elapsed),
        }
    }

    /// Elapsed time as Duration
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Take the value, `None` on timeout
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Map the value, keeping success and elapsed time
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WaitOutcome<U> {
        WaitOutcome {
            success: self.success,
            value: self.value.map(f),
            elapsed_ms: self.elapsed_ms,
        }
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// WAITER IMPLEMENTATION
// =============================================================================

/// Waiter for synchronization operations
#[derive(Debug, Clone, Default)]
pub struct Waiter {
    options: WaitOptions,
}

impl Waiter {
    /// Create a new waiter with default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom options
    #[must_use]
    pub fn with_options(options: WaitOptions) -> Self {
        Self { options }
    }

    /// Waiter with a timeout and fixed interval
    #[must_use]
    pub fn bounded(timeout: Duration, poll_interval: Duration) -> Self {
        Self::with_options(
            WaitOptions::new()
                .with_timeout(duration_ms(timeout))
                .with_poll_interval(duration_ms(poll_interval)),
        )
    }

    /// Options in use
    #[must_use]
    pub const fn options(&self) -> &WaitOptions {
        &self.options
    }

    /// Poll `predicate` until it yields a value.
    ///
    /// The predicate always runs at least once, even with a zero timeout.
    pub fn until<T, F>(&self, what: &str, mut predicate: F) -> EsperarResult<WaitOutcome<T>>
    where
        F: FnMut() -> EsperarResult<Option<T>>,
    {
        let start = Instant::now();
        let timeout = self.options.timeout();
        let mut interval_ms = self.options.poll_interval_ms;
        let mut polls = 0u32;

        loop {
            polls += 1;
            match predicate() {
                Ok(Some(value)) => {
                    tracing::debug!(
                        what,
                        polls,
                        elapsed_ms = duration_ms(start.elapsed()),
                        "wait satisfied"
                    );
                    return Ok(WaitOutcome::succeeded(value, start.elapsed()));
                }
                Ok(None) => {}
                Err(err) if err.is_transient() => {
                    tracing::trace!(what, error = %err, "transient predicate failure");
                }
                Err(err) => {
                    tracing::debug!(what, polls, error = %err, "wait aborted");
                    return Err(err);
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                tracing::debug!(
                    what,
                    polls,
                    elapsed_ms = duration_ms(elapsed),
                    "wait timed out"
                );
                return Ok(WaitOutcome::timed_out(elapsed));
            }

            let remaining = timeout.saturating_sub(elapsed);
            std::thread::sleep(Duration::from_millis(interval_ms).min(remaining));
            interval_ms = self.options.next_interval_ms(interval_ms);
        }
    }

    /// Poll a boolean predicate
    pub fn until_true<F>(&self, what: &str, mut predicate: F) -> EsperarResult<WaitOutcome<()>>
    where
        F: FnMut() -> EsperarResult<bool>,
    {
        self.until(what, || Ok(predicate()?.then_some(())))
    }
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Poll `predicate` with an explicit timeout and interval
pub fn wait_until<T, F>(
    predicate: F,
    timeout: Duration,
    poll_interval: Duration,
) -> EsperarResult<WaitOutcome<T>>
where
    F: FnMut() -> EsperarResult<Option<T>>,
{
    Waiter::bounded(timeout, poll_interval).until("condition", predicate)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::result::EsperarError;

    mod wait_options_tests {
        use super::*;

        #[test]
        fn test_wait_options_default() {
            let opts = WaitOptions::default();
            assert_eq!(opts.timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);
            assert_eq!(opts.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
            assert!((opts.backoff - 1.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_wait_options_chained() {
            let opts = WaitOptions::new()
                .with_timeout(5000)
                .with_poll_interval(100)
                .with_backoff(2.0, 800);
            assert_eq!(opts.timeout(), Duration::from_millis(5000));
            assert_eq!(opts.poll_interval(), Duration::from_millis(100));
            assert_eq!(opts.max_poll_interval_ms, 800);
        }

        #[test]
        fn test_fixed_interval_does_not_grow() {
            let opts = WaitOptions::new().with_poll_interval(50);
            assert_eq!(opts.next_interval_ms(50), 50);
        }

        #[test]
        fn test_backoff_grows_to_ceiling() {
            let opts = WaitOptions::new()
                .with_poll_interval(100)
                .with_backoff(2.0, 300);
            assert_eq!(opts.next_interval_ms(100), 200);
            assert_eq!(opts.next_interval_ms(200), 300);
            assert_eq!(opts.next_interval_ms(300), 300);
        }

        #[test]
        fn test_nonsense_backoff_is_fixed() {
            let opts = WaitOptions::new().with_backoff(f64::NAN, 300);
            assert_eq!(opts.next_interval_ms(40), 40);
        }

        #[test]
        fn test_yaml_partial() {
            let opts: WaitOptions = serde_yaml_ng::from_str("timeout_ms: 750\n").unwrap();
            assert_eq!(opts.timeout_ms, 750);
            assert_eq!(opts.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        }
    }

    mod wait_outcome_tests {
        use super::*;

        #[test]
        fn test_outcome_map_and_value() {
            let outcome = WaitOutcome::succeeded(2, Duration::from_millis(15));
            assert!(outcome.success);
            assert_eq!(outcome.elapsed(), Duration::from_millis(15));
            assert_eq!(outcome.map(|v| v * 10).into_value(), Some(20));
        }

        #[test]
        fn test_timed_out_has_no_value() {
            let outcome: WaitOutcome<u8> = WaitOutcome::timed_out(Duration::from_millis(30));
            assert!(!outcome.success);
            assert_eq!(outcome.value, None);
            assert_eq!(outcome.elapsed_ms, 30);
        }

        #[test]
        fn test_outcome_serializes() {
            let outcome = WaitOutcome::succeeded("x", Duration::from_millis(1));
            let json = serde_json::to_value(&outcome).unwrap();
            assert_eq!(json["success"], true);
            assert_eq!(json["value"], "x");
        }
    }

    mod waiter_tests {
        use super::*;

        #[test]
        fn test_immediate_success() {
            let outcome = wait_until(
                || Ok(Some("ready")),
                Duration::from_millis(100),
                Duration::from_millis(10),
            )
            .unwrap();
            assert!(outcome.success);
            assert_eq!(outcome.value, Some("ready"));
        }

        #[test]
        fn test_success_after_polls() {
            let mut calls = 0;
            let outcome = wait_until(
                || {
                    calls += 1;
                    Ok((calls >= 3).then_some(calls))
                },
                Duration::from_secs(2),
                Duration::from_millis(5),
            )
            .unwrap();
            assert_eq!(outcome.value, Some(3));
        }

        #[test]
        fn test_timeout_bounds() {
            let timeout = Duration::from_millis(120);
            let interval = Duration::from_millis(40);
            let outcome: WaitOutcome<()> =
                wait_until(|| Ok(None), timeout, interval).unwrap();
            assert!(!outcome.success);
            assert!(outcome.value.is_none());
            assert!(outcome.elapsed_ms >= 120);
            // one interval of slack plus scheduler jitter
            assert!(outcome.elapsed_ms < 120 + 40 + 60);
        }

        #[test]
        fn test_zero_timeout_polls_once() {
            let mut calls = 0;
            let outcome: WaitOutcome<()> = wait_until(
                || {
                    calls += 1;
                    Ok(None)
                },
                Duration::ZERO,
                Duration::from_millis(10),
            )
            .unwrap();
            assert!(!outcome.success);
            assert_eq!(calls, 1);
        }

        #[test]
        fn test_transient_errors_keep_polling() {
            let mut calls = 0;
            let outcome = wait_until(
                || {
                    calls += 1;
                    if calls < 3 {
                        Err(EsperarError::not_ready("spinner"))
                    } else {
                        Ok(Some(calls))
                    }
                },
                Duration::from_secs(1),
                Duration::from_millis(5),
            )
            .unwrap();
            assert_eq!(outcome.value, Some(3));
        }

        #[test]
        fn test_stale_short_circuits() {
            let mut calls = 0;
            let err = wait_until::<(), _>(
                || {
                    calls += 1;
                    Err(EsperarError::stale("card #0"))
                },
                Duration::from_secs(5),
                Duration::from_millis(5),
            )
            .unwrap_err();
            assert!(err.is_stale());
            assert_eq!(calls, 1);
        }

        #[test]
        fn test_fatal_errors_surface() {
            let err = wait_until::<(), _>(
                || Err(EsperarError::driver("session closed")),
                Duration::from_secs(5),
                Duration::from_millis(5),
            )
            .unwrap_err();
            assert!(matches!(err, EsperarError::Driver { .. }));
        }

        #[test]
        fn test_until_true() {
            let mut flips = 0;
            let waiter = Waiter::bounded(Duration::from_secs(1), Duration::from_millis(1));
            let outcome = waiter
                .until_true("flag", || {
                    flips += 1;
                    Ok(flips == 2)
                })
                .unwrap();
            assert!(outcome.success);
        }
    }
}
