//! # Declarative Service Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file that configures the balancer process:
//! listener settings, the generation provider, initial thresholds, the
//! optional health loop, and log output.
//! ```text
//! open-balancer --config balancer.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `BalancerConfig`
//! - Complete defaults: an empty file is a valid configuration
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the controller or the worker (that belongs to `main`)
//! - Hot reload: thresholds change at runtime through the HTTP API only

pub mod loader;
pub mod validation;

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::health::ClosedLoopConfig;
use crate::orchestrator::OrchestratorSettings;
use crate::thresholds::ThresholdSet;
use crate::worker::DEFAULT_MODEL;

// ── Default value functions ──────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Default request body limit: 10 MiB.
fn default_max_request_size() -> usize {
    10 * 1024 * 1024
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "https://open-balancer.web.app".to_string(),
        "https://open-balancer.firebaseapp.com".to_string(),
    ]
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_unit_price() -> f64 {
    crate::orchestrator::DEFAULT_UNIT_PRICE
}

/// Default generation deadline: 30 000ms.
fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_location() -> String {
    "us-central1".to_string()
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a balancer process.
///
/// # Example
///
/// ```toml
/// [server]
/// port = 8080
///
/// [llm]
/// provider = "gemini"
/// model = "gemini-pro"
/// unit_price_per_million = 1.0
///
/// [thresholds.soft]
/// latency_p95 = 2000
/// error_rate = 0.05
/// cost = 50
///
/// [closed_loop]
/// enabled = false
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BalancerConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Generation provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Initial per-mode thresholds, layered over the defaults.
    #[serde(
        default,
        deserialize_with = "crate::thresholds::deserialize_over_defaults"
    )]
    #[schemars(with = "ThresholdSet")]
    pub thresholds: ThresholdSet,
    /// Optional health-driven mode switching.
    #[serde(default)]
    pub closed_loop: ClosedLoopConfig,
    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Server ───────────────────────────────────────────────────────────────

/// HTTP listener configuration.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted request body in bytes.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Connection-level timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Browser origins allowed by CORS. A `"*"` entry allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_request_size: default_max_request_size(),
            timeout_seconds: default_timeout_seconds(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

// ── LLM provider ─────────────────────────────────────────────────────────

/// Supported generation backends.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Google Gemini (Generative Language API or Vertex AI).
    #[default]
    Gemini,
    /// Echo worker for testing and demos. No network.
    Echo,
}

/// Generation provider configuration.
///
/// # Panics
///
/// This type never panics.
#[derive(Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LlmConfig {
    /// Backend to call.
    #[serde(default)]
    pub provider: ProviderKind,
    /// Model identity, also used as the `model` metric label.
    #[serde(default = "default_model")]
    pub model: String,
    /// Process-wide API key used when a request carries none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Currency units per million tokens.
    #[serde(default = "default_unit_price")]
    pub unit_price_per_million: f64,
    /// Deadline for one generation call, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Generative Language API root override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// GCP project for ambient Vertex AI auth. Ambient auth is off without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_project: Option<String>,
    /// GCP region for Vertex AI.
    #[serde(default = "default_location")]
    pub vertex_location: String,
    /// OAuth bearer token for Vertex AI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_access_token: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("unit_price_per_million", &self.unit_price_per_million)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("base_url", &self.base_url)
            .field("vertex_project", &self.vertex_project)
            .field("vertex_location", &self.vertex_location)
            .field("vertex_access_token", &redact(&self.vertex_access_token))
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            api_key: None,
            unit_price_per_million: default_unit_price(),
            request_timeout_ms: default_request_timeout_ms(),
            base_url: None,
            vertex_project: None,
            vertex_location: default_location(),
            vertex_access_token: None,
        }
    }
}

impl LlmConfig {
    /// Whether requests without any key can still be served.
    ///
    /// The echo provider needs no credential; Gemini needs a Vertex project.
    pub fn ambient_auth(&self) -> bool {
        match self.provider {
            ProviderKind::Echo => true,
            ProviderKind::Gemini => self.vertex_project.is_some(),
        }
    }

    /// Settings for [`crate::RequestOrchestrator`].
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            unit_price_per_million: self.unit_price_per_million,
            default_api_key: self.api_key.clone().filter(|k| !k.is_empty()),
            ambient_auth: self.ambient_auth(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Observability configuration.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

impl LogFormat {
    /// Name accepted by [`crate::init_tracing_with`].
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

/// Export the JSON Schema for `BalancerConfig`.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(BalancerConfig);
    serde_json::to_string_pretty(&schema)
}
