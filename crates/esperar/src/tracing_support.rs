//! Log subscriber setup.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the test binary. These helpers cover the common case: an `EnvFilter`
//! honouring `RUST_LOG`, falling back to a configured directive, writing to
//! stderr so output interleaves with the test harness.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::result::{EsperarError, EsperarResult};

/// Default filter directive
pub const DEFAULT_LOG_FILTER: &str = "esperar=info";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human-readable output
    #[default]
    Compact,
    /// Multi-line human-readable output
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Output format
    pub format: LogFormat,
    /// Include event targets
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::Compact,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Create with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback filter directive
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Set the output format
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Build the filter: `RUST_LOG` if set and valid, else `self.filter`
    pub fn env_filter(&self) -> EsperarResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.filter)
            .map_err(|e| EsperarError::config(format!("invalid log filter {:?}: {e}", self.filter)))
    }
}

/// Install a global subscriber. Fails if the filter is invalid or a
/// subscriber is already installed.
pub fn try_init_tracing(config: &LogConfig) -> EsperarResult<()> {
    let filter = config.env_filter()?;
    let layer = match config.format {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(config.with_target)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(config.with_target)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_target(config.with_target)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| EsperarError::config(format!("tracing subscriber: {e}")))
}

/// Install a compact subscriber with `filter` as fallback directive.
///
/// Safe to call from every test: a second installation is ignored.
pub fn init_tracing(filter: &str) {
    let config = LogConfig::new().with_filter(filter);
    if let Err(err) = try_init_tracing(&config) {
        tracing::debug!(error = %err, "tracing already initialized");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    fn test_format_from_yaml() {
        let config: LogConfig = serde_yaml_ng::from_str("format: json\n").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.with_target);
    }

    #[test]
    fn test_init_is_repeatable() {
        init_tracing("esperar=debug");
        init_tracing("esperar=debug");
        tracing::debug!("still alive");
    }

    #[test]
    fn test_second_try_init_errors() {
        init_tracing("esperar=warn");
        let err = try_init_tracing(&LogConfig::new()).unwrap_err();
        assert!(matches!(err, EsperarError::Config { .. }));
    }
}
