//! Aggregate configuration.
//!
//! Every section has working defaults for the storefront markup, so a YAML
//! file only needs the keys it overrides:
//!
//! ```yaml
//! wait:
//!   timeout_ms: 5000
//!   poll_interval_ms: 100
//! matcher:
//!   min_overlap: 3
//! notifications:
//!   keywords: [saved, "đã lưu"]
//! entities:
//!   cards:
//!     - css: ".address-card"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::entity::EntityMarkup;
use crate::field_errors::FieldErrorConfig;
use crate::matcher::FuzzyMatcher;
use crate::notify::NotificationConfig;
use crate::result::{EsperarError, EsperarResult};
use crate::tracing_support::LogConfig;
use crate::wait::WaitOptions;

/// Full configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsperarConfig {
    /// Default wait behaviour
    pub wait: WaitOptions,
    /// Label matching thresholds
    pub matcher: FuzzyMatcher,
    /// Notification capture
    pub notifications: NotificationConfig,
    /// Entity card markup
    pub entities: EntityMarkup,
    /// Validation message lookup
    pub field_errors: FieldErrorConfig,
    /// Log subscriber
    pub logging: LogConfig,
}

impl EsperarConfig {
    /// Create with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate YAML
    pub fn from_yaml_str(yaml: &str) -> EsperarResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> EsperarResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading configuration");
        Self::from_yaml_str(&yaml)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> EsperarResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Set the wait options
    #[must_use]
    pub fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Set the matcher
    #[must_use]
    pub fn with_matcher(mut self, matcher: FuzzyMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Set the notification config
    #[must_use]
    pub fn with_notifications(mut self, notifications: NotificationConfig) -> Self {
        self.notifications = notifications;
        self
    }

    /// Set the entity markup
    #[must_use]
    pub fn with_entities(mut self, entities: EntityMarkup) -> Self {
        self.entities = entities;
        self
    }

    /// Reject zero timeouts and intervals and empty selector chains
    pub fn validate(&self) -> EsperarResult<()> {
        let positive = [
            ("wait.timeout_ms", self.wait.timeout_ms),
            ("wait.poll_interval_ms", self.wait.poll_interval_ms),
            ("notifications.bridge_poll_interval_ms", self.notifications.bridge_poll_interval_ms),
            ("notifications.visibility_ms", self.notifications.visibility_ms),
            ("notifications.presence_ms", self.notifications.presence_ms),
            ("notifications.stage_poll_interval_ms", self.notifications.stage_poll_interval_ms),
            ("notifications.body_scan_ms", self.notifications.body_scan_ms),
            ("notifications.body_scan_interval_ms", self.notifications.body_scan_interval_ms),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(EsperarError::config(format!("{key} must be greater than zero")));
            }
        }

        if !(self.wait.backoff.is_finite() && self.wait.backoff >= 1.0) {
            return Err(EsperarError::config(format!(
                "wait.backoff must be a finite number >= 1.0, got {}",
                self.wait.backoff
            )));
        }

        if self.matcher.min_overlap == 0 {
            return Err(EsperarError::config("matcher.min_overlap must be at least 1"));
        }

        let chains = [
            ("notifications.selectors", self.notifications.selectors.is_empty()),
            (
                "notifications.subscription_selectors",
                self.notifications.subscription_selectors.is_empty(),
            ),
            ("entities.cards", self.entities.cards.is_empty()),
            ("entities.name", self.entities.name.is_empty()),
            ("field_errors.errors", self.field_errors.errors.is_empty()),
        ];
        for (key, empty) in chains {
            if empty {
                return Err(EsperarError::config(format!("{key} must list at least one selector")));
            }
        }

        if self.notifications.namespace.trim().is_empty() {
            return Err(EsperarError::config("notifications.namespace must not be empty"));
        }
        Ok(())
    }
}
