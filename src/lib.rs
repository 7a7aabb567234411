//! # open-balancer
//!
//! Adaptive brownout controller for LLM-backed services.
//!
//! ## Architecture
//!
//! ```text
//! alert webhook ─► AlertIngestor ─┐
//! manual API ─────────────────────┼─► ModeController ◄── HealthMonitor (optional)
//!                                 │        │
//! chat request ─► RequestOrchestrator ─────┘ mode snapshot
//!                      │
//!                      ├─► policy::resolve(mode) ─► GenerationPolicy
//!                      ├─► ModelWorker::generate(prompt, policy)
//!                      └─► TelemetrySink (tokens, cost, latency, quality)
//! ```
//!
//! The controller is a policy store plus a four-state mode machine. Mode
//! changes are explicit commands; the health loop only acts when enabled.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod alert;
pub mod config;
pub mod controller;
pub mod health;
pub mod metrics;
pub mod mode;
pub mod orchestrator;
pub mod policy;
pub mod telemetry;
pub mod thresholds;
pub mod worker;

#[cfg(feature = "web-api")]
pub mod web_api;

pub use alert::{AlertEvent, AlertIngestor, IgnoreReason, IngestOutcome};
pub use config::BalancerConfig;
pub use controller::{ModeController, ModeTransition};
pub use health::{HealthMonitor, HealthSample, HealthVerdict};
pub use mode::{BrownoutMode, ParseModeError};
pub use orchestrator::{ChatRequest, ChatResult, OrchestratorSettings, RequestOrchestrator};
pub use policy::GenerationPolicy;
pub use telemetry::{NoopTelemetry, TelemetrySink, TransitionSource};
pub use thresholds::{ModeThresholds, ThresholdSet, ThresholdUpdate};
pub use worker::{Credential, EchoWorker, GeminiWorker, Generation, ModelWorker};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`BalancerError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), BalancerError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    init_tracing_with(&format)
}

/// Initialise tracing with an explicit format (`"json"` or `"pretty"`).
///
/// # Errors
///
/// Returns [`BalancerError::Other`] if a global subscriber is already set.
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing_with(format: &str) -> Result<(), BalancerError> {
    let result = match format {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| BalancerError::Other(format!("tracing init failed: {e}")))
}

/// Top-level errors.
///
/// Every failure is local to one request or command; none of these variants
/// leaves the mode state modified.
#[derive(Error, Debug)]
pub enum BalancerError {
    /// No credential was supplied and no process-wide fallback exists.
    ///
    /// Client-correctable: supply an API key.
    #[error("credential missing: supply an API key or configure ambient auth")]
    CredentialMissing,

    /// The generation capability failed or timed out. Not retried.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// A mode label did not name a mode.
    #[error(transparent)]
    InvalidMode(#[from] ParseModeError),

    /// A threshold update was structurally invalid.
    #[error("invalid thresholds: {0}")]
    InvalidThresholds(#[from] thresholds::ThresholdError),

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl From<config::validation::ConfigError> for BalancerError {
    fn from(e: config::validation::ConfigError) -> Self {
        BalancerError::Config(e.to_string())
    }
}

impl BalancerError {
    /// Short label used as the `err_type` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            BalancerError::CredentialMissing => "credential_missing",
            BalancerError::UpstreamFailure(_) => "upstream_failure",
            BalancerError::InvalidMode(_) => "invalid_mode",
            BalancerError::InvalidThresholds(_) => "invalid_thresholds",
            BalancerError::Config(_) => "config",
            BalancerError::Other(_) => "other",
        }
    }
}
