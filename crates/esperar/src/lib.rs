//! Esperar: Synchronization for Eventually-Consistent Web UIs
//!
//! Esperar (Spanish: "to wait") keeps browser-driven end-to-end tests stable
//! against pages that re-render asynchronously. It answers three questions
//! without trusting any element reference across a state change:
//!
//! - which entity in a server-rendered list is the default, and how to make
//!   one the default and confirm it stuck
//! - what a transient notification said, even if it vanished before a
//!   poll could see it
//! - whether a newly created entity has appeared, matched by a tolerant
//!   label comparison
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    ESPERAR Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │   │ Convergence  │  │ Notification │  │ FieldError   │          │
//! │   │ Controller   │  │ Bridge       │  │ Probe        │          │
//! │   └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │          ▼                 │                 │                  │
//! │   ┌──────────────┐         │                 │                  │
//! │   │ EntitySet    │──► FuzzyMatcher ◄── normalize                │
//! │   │ Resolver     │         │                 │                  │
//! │   └──────┬───────┘         │                 │                  │
//! │          ▼                 ▼                 ▼                  │
//! │   ┌─────────────────────────────────────────────────┐           │
//! │   │ Waiter + SelectorChain  over  Driver            │           │
//! │   │ (MockDriver in tests, CdpDriver with "browser") │           │
//! │   └─────────────────────────────────────────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use esperar::prelude::*;
//! use std::time::Duration;
//!
//! let driver = MockDriver::new();
//! driver.append(
//!     MockNode::new("div").class("address-card").child(
//!         MockNode::new("div")
//!             .class("address__summary")
//!             .child(MockNode::new("span").class("full-name").text("Ana Lima"))
//!             .child(MockNode::new("span").class("telephone").text("0901234567")),
//!     ),
//! );
//!
//! let controller = ConvergenceController::new(&driver);
//! let outcome = controller.wait_for_entity("ana  LIMA", Duration::from_millis(100), MatchPolicy::Strict);
//! assert!(outcome.success);
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

#[cfg(feature = "browser")]
#[allow(clippy::missing_errors_doc, clippy::significant_drop_tightening)]
mod cdp;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
mod config;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
mod converge;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate, clippy::missing_const_for_fn)]
mod driver;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
mod entity;
#[allow(clippy::missing_errors_doc)]
mod field_errors;
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
mod locator;
#[allow(clippy::must_use_candidate)]
mod matcher;
#[allow(clippy::missing_errors_doc, clippy::doc_markdown)]
mod notify;
mod result;
mod text;

/// Log subscriber setup
///
/// Structured logging through `tracing`, configured by `LogConfig`.
#[allow(clippy::missing_errors_doc)]
pub mod tracing_support;

/// Bounded polling with typed outcomes
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
pub mod wait;

#[cfg(feature = "browser")]
pub use cdp::{CdpConfig, CdpDriver};
pub use config::EsperarConfig;
pub use converge::{
    ConvergenceController, ConvergenceReport, ConvergenceState, MatchPolicy, NewEntityEvidence,
};
pub use driver::{
    AsyncScriptHandler, Driver, ElementHandle, MockDriver, MockHook, MockNode, MockNodeId,
    ScriptHandler,
};
pub use entity::{DefaultFlag, EntityCard, EntityMarkup, EntitySetResolver};
pub use field_errors::{FieldErrorConfig, FieldErrorProbe};
pub use locator::{Selector, SelectorChain};
pub use matcher::{
    match_labels, FuzzyMatcher, MatchResult, MatchStrategy, DEFAULT_MIN_OVERLAP,
    DEFAULT_MIN_SUBSTRING_LEN,
};
pub use notify::{
    keyword_snippet, NotificationBridge, NotificationCapture, NotificationConfig,
    NotificationSource, Subscription,
};
pub use result::{EsperarError, EsperarResult};
pub use text::{normalize, normalize_opt, NormalizedLabel};
pub use tracing_support::{init_tracing, try_init_tracing, LogConfig, LogFormat};
pub use wait::{wait_until, WaitOptions, WaitOutcome, Waiter};

/// Prelude for convenient imports
pub mod prelude {
    #[cfg(feature = "browser")]
    pub use super::cdp::*;
    pub use super::config::*;
    pub use super::converge::*;
    pub use super::driver::*;
    pub use super::entity::*;
    pub use super::field_errors::*;
    pub use super::locator::*;
    pub use super::matcher::*;
    pub use super::notify::*;
    pub use super::result::*;
    pub use super::text::*;
    pub use super::tracing_support::*;
    pub use super::wait::*;
}
