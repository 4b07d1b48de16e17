//! Result and error types for Esperar.
//!
//! The variants map onto the synchronization taxonomy:
//!
//! - [`EsperarError::NotReady`]: transient, the waiter keeps polling
//! - [`EsperarError::StaleResource`]: the handle or index is gone, the caller re-resolves
//! - [`EsperarError::UnsupportedSelector`]: the driver cannot evaluate the selector
//! - [`EsperarError::MalformedState`]: a fragment lacks required structure and is skipped

use thiserror::Error;

/// Result type for Esperar operations
pub type EsperarResult<T> = Result<T, EsperarError>;

/// Errors that can occur in Esperar
#[derive(Debug, Error)]
pub enum EsperarError {
    /// Condition not met yet, keep polling
    #[error("Not ready: {what}")]
    NotReady {
        /// What is not ready
        what: String,
    },

    /// A previously obtained handle no longer matches live UI state
    #[error("Stale resource: {what}")]
    StaleResource {
        /// Which handle or index went stale
        what: String,
    },

    /// Rendered structure does not match what was expected
    #[error("Malformed state: {message}")]
    MalformedState {
        /// Error message
        message: String,
    },

    /// Driver failure (session lost, protocol error)
    #[error("Driver error: {message}")]
    Driver {
        /// Error message
        message: String,
    },

    /// Script evaluation failed
    #[error("Script evaluation failed: {message}")]
    Script {
        /// Error message
        message: String,
    },

    /// The driver cannot evaluate this selector form
    #[error("Unsupported selector: {selector}")]
    UnsupportedSelector {
        /// Selector description
        selector: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl EsperarError {
    /// Create a not-ready error
    #[must_use]
    pub fn not_ready(what: impl Into<String>) -> Self {
        Self::NotReady { what: what.into() }
    }

    /// Create a stale-resource error
    #[must_use]
    pub fn stale(what: impl Into<String>) -> Self {
        Self::StaleResource { what: what.into() }
    }

    /// Create a malformed-state error
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedState {
            message: message.into(),
        }
    }

    /// Create a driver error
    #[must_use]
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Create a script error
    #[must_use]
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether polling should simply continue
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// Whether the error signals a stale handle or index
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleResource { .. })
    }
}
