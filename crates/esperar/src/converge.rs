//! Idempotent convergence: "make state X true, then confirm it".
//!
//! ```text
//!  Checked ──(default exists)──────────────────────────► Converged
//!     │
//!     └─(none)─► Acted(candidate i) ──poll──► Converged
//!                     ▲                 │
//!                     └──(timeout, i+1)─┴──(no candidates left)──► Failed
//! ```
//!
//! The acted-upon card is expected to mutate or be replaced, so the
//! controller remembers only its positional index and re-resolves the whole
//! set on every poll. Each candidate is clicked at most once.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::driver::Driver;
use crate::entity::{EntityCard, EntitySetResolver};
use crate::matcher::{MatchResult, MatchStrategy};
use crate::result::{EsperarError, EsperarResult};
use crate::wait::{duration_ms, WaitOptions, WaitOutcome, Waiter};

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConvergenceState {
    /// Current state inspected
    Checked,
    /// Corrective action performed
    Acted,
    /// Target state confirmed
    Converged,
    /// Gave up
    Failed,
}

impl fmt::Display for ConvergenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Checked => "checked",
            Self::Acted => "acted",
            Self::Converged => "converged",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of [`ConvergenceController::ensure_default_report`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvergenceReport {
    /// The default card, `None` on failure
    pub card: Option<EntityCard>,
    /// Final state
    pub state: ConvergenceState,
    /// Corrective actions performed
    pub attempts: usize,
    /// Total time spent
    pub elapsed_ms: u64,
}

impl ConvergenceReport {
    fn finish(card: Option<EntityCard>, state: ConvergenceState, attempts: usize, start: Instant) -> Self {
        Self {
            card,
            state,
            attempts,
            elapsed_ms: duration_ms(start.elapsed()),
        }
    }

    /// Converged without any action
    #[must_use]
    pub fn was_already_converged(&self) -> bool {
        self.state == ConvergenceState::Converged && self.attempts == 0
    }
}

/// Which match strategies count as "present"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum MatchPolicy {
    /// Exact or Substring only
    #[default]
    Strict,
    /// Any strategy, including advisory partial overlap
    Tolerant,
}

impl MatchPolicy {
    /// Whether `result` satisfies the policy
    #[must_use]
    pub const fn accepts(&self, result: &MatchResult) -> bool {
        match self {
            Self::Strict => result.is_strict(),
            Self::Tolerant => result.matched,
        }
    }
}

/// Why a new entity is considered present
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NewEntityEvidence {
    /// More complete cards than before the action
    CountGrew {
        /// Count before the action
        before: usize,
        /// Count observed
        after: usize,
    },
    /// A visible name matched the expected one
    NameVisible {
        /// Observed name
        name: String,
        /// Strategy that matched
        strategy: MatchStrategy,
    },
}

/// Performs an action and confirms its effect by re-resolution
pub struct ConvergenceController<'d, D: Driver + ?Sized> {
    resolver: EntitySetResolver<'d, D>,
    wait: WaitOptions,
}

impl<D: Driver + ?Sized> fmt::Debug for ConvergenceController<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergenceController")
            .field("resolver", &self.resolver)
            .field("wait", &self.wait)
            .finish()
    }
}

impl<'d, D: Driver + ?Sized> ConvergenceController<'d, D> {
    /// Controller with default markup and polling
    #[must_use]
    pub fn new(driver: &'d D) -> Self {
        Self::with_resolver(EntitySetResolver::new(driver))
    }

    /// Controller over a configured resolver
    #[must_use]
    pub fn with_resolver(resolver: EntitySetResolver<'d, D>) -> Self {
        Self {
            resolver,
            wait: WaitOptions::default(),
        }
    }

    /// Polling options; the timeout comes from each call
    #[must_use]
    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Resolver in use
    #[must_use]
    pub const fn resolver(&self) -> &EntitySetResolver<'d, D> {
        &self.resolver
    }

    fn waiter(&self, timeout: Duration) -> Waiter {
        Waiter::with_options(self.wait.clone().with_timeout(duration_ms(timeout)))
    }

    /// Ensure some card is default; returns it, or `None` if that failed
    pub fn ensure_default(&self, timeout: Duration) -> Option<EntityCard> {
        self.ensure_default_report(timeout).card
    }

    /// [`Self::ensure_default`] with state, attempt count and timing.
    ///
    /// `timeout` bounds the confirmation wait for each candidate.
    pub fn ensure_default_report(&self, timeout: Duration) -> ConvergenceReport {
        let start = Instant::now();

        match self.resolver.find_default() {
            Ok(Some(card)) => {
                tracing::info!(state = %ConvergenceState::Converged, index = card.index, "default already present");
                return ConvergenceReport::finish(Some(card), ConvergenceState::Converged, 0, start);
            }
            Ok(None) => tracing::debug!(state = %ConvergenceState::Checked, "no default card"),
            Err(err) => tracing::debug!(state = %ConvergenceState::Checked, error = %err, "initial check failed"),
        }

        let mut attempts = 0;
        let mut next = 0;
        loop {
            let candidate = match self.next_candidate(next) {
                Ok(Some(index)) => index,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "candidate scan failed");
                    break;
                }
            };
            next = candidate + 1;

            match self.resolver.promote_at(candidate) {
                Ok(true) => {
                    attempts += 1;
                    tracing::info!(state = %ConvergenceState::Acted, index = candidate, "promote clicked");
                }
                Ok(false) => continue,
                Err(err) if err.is_stale() => {
                    tracing::debug!(index = candidate, error = %err, "candidate went stale before click");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(index = candidate, error = %err, "promote failed, trying next candidate");
                    continue;
                }
            }

            match self.confirm_promoted(candidate, timeout) {
                Ok(outcome) if outcome.success => {
                    let card = self
                        .resolver
                        .find_default()
                        .ok()
                        .flatten()
                        .or(outcome.value);
                    tracing::info!(
                        state = %ConvergenceState::Converged,
                        index = candidate,
                        elapsed_ms = outcome.elapsed_ms,
                        "default converged"
                    );
                    return ConvergenceReport::finish(card, ConvergenceState::Converged, attempts, start);
                }
                Ok(outcome) => {
                    tracing::warn!(index = candidate, elapsed_ms = outcome.elapsed_ms, "no convergence, trying next candidate");
                }
                Err(err) => {
                    tracing::warn!(index = candidate, error = %err, "convergence wait aborted, trying next candidate");
                }
            }
        }

        tracing::info!(state = %ConvergenceState::Failed, attempts, "no default reached");
        ConvergenceReport::finish(None, ConvergenceState::Failed, attempts, start)
    }

    fn next_candidate(&self, from: usize) -> EsperarResult<Option<usize>> {
        Ok(self
            .resolver
            .list()?
            .into_iter()
            .find(|card| card.index >= from && card.has_default_action)
            .map(|card| card.index))
    }

    fn confirm_promoted(&self, index: usize, timeout: Duration) -> EsperarResult<WaitOutcome<EntityCard>> {
        self.waiter(timeout).until("default convergence", || {
            if let Some(card) = retry_on_stale(self.resolver.find_default())? {
                return Ok(Some(card));
            }
            retry_on_stale(
                self.resolver
                    .card_at(index)
                    .map(|card| card.filter(|c| !c.has_default_action)),
            )
        })
    }

    /// Wait until a card named like `expected` is listed
    pub fn wait_for_entity(&self, expected: &str, timeout: Duration, policy: MatchPolicy) -> WaitOutcome<EntityCard> {
        let start = Instant::now();
        let outcome = self.waiter(timeout).until("entity listed", || {
            let found = retry_on_stale(self.resolver.find_by_name(expected))?;
            Ok(found
                .filter(|(_, result)| policy.accepts(result))
                .map(|(card, _)| card))
        });
        settle(outcome, start, "wait_for_entity")
    }

    /// Wait until the card count grows past `before_count` or a visible name
    /// matches `expected`
    pub fn wait_for_new_entity(
        &self,
        expected: &str,
        before_count: usize,
        timeout: Duration,
    ) -> WaitOutcome<NewEntityEvidence> {
        let start = Instant::now();
        let matcher = self.resolver.matcher();
        let outcome = self.waiter(timeout).until("new entity", || {
            let after = match self.resolver.count() {
                Ok(after) => after,
                Err(err) if err.is_stale() => return Ok(None),
                Err(err) => return Err(err),
            };
            if after > before_count {
                return Ok(Some(NewEntityEvidence::CountGrew {
                    before: before_count,
                    after,
                }));
            }
            let names = retry_on_stale(self.resolver.visible_names().map(Some))?.unwrap_or_default();
            Ok(names.into_iter().find_map(|name| {
                let result = matcher.compare(expected, &name);
                result
                    .strategy
                    .map(|strategy| NewEntityEvidence::NameVisible { name, strategy })
            }))
        });
        settle(outcome, start, "wait_for_new_entity")
    }

    /// Wait until the card named like `name` shows `phone`.
    ///
    /// The card is looked up by name on every poll; a re-rendered card is
    /// picked up transparently.
    pub fn wait_for_phone(&self, name: &str, phone: &str, timeout: Duration) -> WaitOutcome<EntityCard> {
        let start = Instant::now();
        let phone = phone.trim();
        let outcome = self.waiter(timeout).until("card phone", || {
            let found = retry_on_stale(self.resolver.find_by_name(name))?;
            Ok(found
                .map(|(card, _)| card)
                .filter(|card| card.phone == phone))
        });
        settle(outcome, start, "wait_for_phone")
    }
}

fn retry_on_stale<T>(result: EsperarResult<Option<T>>) -> EsperarResult<Option<T>> {
    match result {
        Err(err) if err.is_stale() || matches!(err, EsperarError::MalformedState { .. }) => {
            tracing::trace!(error = %err, "re-resolving on next poll");
            Ok(None)
        }
        other => other,
    }
}

fn settle<T>(outcome: EsperarResult<WaitOutcome<T>>, start: Instant, operation: &str) -> WaitOutcome<T> {
    outcome.unwrap_or_else(|err| {
        tracing::warn!(operation, error = %err, "wait aborted");
        WaitOutcome::timed_out(start.elapsed())
    })
}
