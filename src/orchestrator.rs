//! # Request Orchestrator
//!
//! ## Responsibility
//! Serve one chat request under the active brownout mode: snapshot the mode,
//! resolve the generation policy, pick a credential, call the generation
//! capability once under a deadline, and derive cost/quality metrics.
//!
//! ## Guarantees
//! - The mode is read exactly once per request; the same snapshot shapes the
//!   policy and tags the result even if the mode changes mid-flight
//! - No credential means no outbound call
//! - Capability failures and timeouts surface once as `UpstreamFailure`;
//!   there is no retry
//! - Telemetry is reported inline and can never fail the request
//!
//! ## NOT Responsible For
//! - Changing the mode (that belongs to `controller`)
//! - Talking to a provider (that belongs to `worker`)

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use crate::controller::ModeController;
use crate::mode::BrownoutMode;
use crate::policy;
use crate::telemetry::{NoopTelemetry, TelemetrySink};
use crate::worker::{Credential, ModelWorker};
use crate::BalancerError;

/// Metric route label for chat requests.
pub const CHAT_ROUTE: &str = "ai-chat";

/// Default price per million tokens.
pub const DEFAULT_UNIT_PRICE: f64 = 1.0;

/// Default deadline for one generation call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrator settings, normally built from [`crate::config::BalancerConfig`].
#[derive(Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Currency units per million tokens.
    pub unit_price_per_million: f64,
    /// Process-wide API key used when a request carries none.
    pub default_api_key: Option<String>,
    /// Whether the worker can authenticate without a key.
    pub ambient_auth: bool,
    /// Deadline applied by [`RequestOrchestrator::handle`].
    pub request_timeout: Duration,
}

impl std::fmt::Debug for OrchestratorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorSettings")
            .field("unit_price_per_million", &self.unit_price_per_million)
            .field("default_api_key", &self.default_api_key.as_ref().map(|_| "<redacted>"))
            .field("ambient_auth", &self.ambient_auth)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            unit_price_per_million: DEFAULT_UNIT_PRICE,
            default_api_key: None,
            ambient_auth: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// One inbound chat request.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// User message.
    pub message: String,
    /// Console area or free-form hint, e.g. `"dashboard"`.
    #[serde(rename = "context", default = "default_context")]
    pub context_hint: String,
    /// Per-request API key override.
    #[serde(rename = "apiKey", default)]
    pub credential: Option<String>,
}

fn default_context() -> String {
    "general".to_string()
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("message_len", &self.message.len())
            .field("context_hint", &self.context_hint)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ChatRequest {
    /// Request with no credential override.
    pub fn new(message: impl Into<String>, context_hint: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context_hint: context_hint.into(),
            credential: None,
        }
    }

    /// Attach a per-request API key.
    pub fn with_credential(mut self, key: impl Into<String>) -> Self {
        self.credential = Some(key.into());
        self
    }
}

/// Outcome of a served chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    /// Generated text.
    pub content: String,
    /// Provider-reported or estimated token count.
    #[serde(rename = "tokensUsed")]
    pub tokens_used: u64,
    /// `tokens_used / 1e6 * unit_price`.
    #[serde(rename = "cost")]
    pub estimated_cost: f64,
    /// Wall-clock time of the generation call only.
    #[serde(rename = "latency")]
    pub latency_ms: f64,
    /// Heuristic in `[0.7, 1.0]`.
    #[serde(rename = "quality")]
    pub quality_score: f64,
    /// Mode snapshot taken at request start.
    #[serde(rename = "brownoutMode")]
    pub mode: BrownoutMode,
    /// Model identity.
    pub model: String,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
}

/// Token estimate when the provider reports none: one token per four chars.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Cost of `tokens` at `unit_price` per million.
pub fn estimate_cost(tokens: u64, unit_price: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * unit_price
}

/// Quality heuristic: `0.7` for an empty response, rising `0.2` per thousand
/// characters and saturating at `1.0`.
pub fn quality_score(content_chars: usize) -> f64 {
    (0.7 + (content_chars as f64 / 1000.0) * 0.2).min(1.0)
}

/// Pick the credential for one request.
///
/// A non-empty override wins over the default key; with neither, ambient
/// auth is used when available.
pub fn resolve_credential(
    override_key: Option<&str>,
    default_key: Option<&str>,
    ambient_auth: bool,
) -> Option<Credential> {
    let non_empty = |k: &&str| !k.trim().is_empty();
    override_key
        .filter(non_empty)
        .or(default_key.filter(non_empty))
        .map(|k| Credential::ApiKey(k.to_string()))
        .or(ambient_auth.then_some(Credential::Ambient))
}

/// Serves chat requests under the controller's current mode.
pub struct RequestOrchestrator {
    controller: Arc<ModeController>,
    worker: Arc<dyn ModelWorker>,
    telemetry: Arc<dyn TelemetrySink>,
    settings: OrchestratorSettings,
}

impl RequestOrchestrator {
    /// Orchestrator with default settings and no telemetry.
    pub fn new(controller: Arc<ModeController>, worker: Arc<dyn ModelWorker>) -> Self {
        Self {
            controller,
            worker,
            telemetry: Arc::new(NoopTelemetry),
            settings: OrchestratorSettings::default(),
        }
    }

    /// Report to `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Replace the settings.
    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current settings.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Model identity of the underlying worker.
    pub fn model(&self) -> &str {
        self.worker.model()
    }

    /// Serve `request` under the configured deadline.
    ///
    /// # Errors
    ///
    /// - [`BalancerError::CredentialMissing`] when no credential is available
    /// - [`BalancerError::UpstreamFailure`] when generation fails or times out
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResult, BalancerError> {
        self.handle_with_deadline(request, self.settings.request_timeout)
            .await
    }

    /// Serve `request`, bounding the generation call by `deadline`.
    ///
    /// # Errors
    ///
    /// Same as [`RequestOrchestrator::handle`].
    pub async fn handle_with_deadline(
        &self,
        request: ChatRequest,
        deadline: Duration,
    ) -> Result<ChatResult, BalancerError> {
        let mode = self.controller.mode();
        let span = tracing::info_span!(
            "chat.handle",
            mode = %mode,
            context = %request.context_hint,
            model = %self.worker.model(),
        );

        let result = self
            .serve(request, mode, deadline)
            .instrument(span)
            .await;

        if let Err(e) = &result {
            self.telemetry.record_error(CHAT_ROUTE, e.kind());
        }
        result
    }

    async fn serve(
        &self,
        request: ChatRequest,
        mode: BrownoutMode,
        deadline: Duration,
    ) -> Result<ChatResult, BalancerError> {
        let policy = policy::resolve(mode);
        let prompt = policy::assemble_prompt(&policy, &request.context_hint, &request.message);

        let credential = resolve_credential(
            request.credential.as_deref(),
            self.settings.default_api_key.as_deref(),
            self.settings.ambient_auth,
        )
        .ok_or_else(|| {
            warn!("no credential available, refusing request");
            BalancerError::CredentialMissing
        })?;

        let model = self.worker.model().to_string();
        let start = Instant::now();
        let outcome = tokio::time::timeout(
            deadline,
            self.worker.generate(&prompt, &policy, &credential),
        )
        .await;
        let elapsed = start.elapsed();
        self.telemetry.record_latency(CHAT_ROUTE, elapsed);

        let generation = match outcome {
            Ok(Ok(generation)) => generation,
            Ok(Err(e)) => {
                warn!(error = %e, "generation failed");
                return Err(match e {
                    BalancerError::UpstreamFailure(detail) => BalancerError::UpstreamFailure(detail),
                    other => BalancerError::UpstreamFailure(other.to_string()),
                });
            }
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "generation timed out");
                return Err(BalancerError::UpstreamFailure(format!(
                    "generation timed out after {}ms",
                    deadline.as_millis()
                )));
            }
        };

        let chars = generation.text.chars().count();
        let tokens_used = generation
            .tokens_used
            .unwrap_or_else(|| estimate_tokens(&generation.text));
        let estimated_cost = estimate_cost(tokens_used, self.settings.unit_price_per_million);
        let quality = quality_score(chars);

        self.telemetry.record_tokens(tokens_used, &model, mode);
        self.telemetry.record_cost(estimated_cost, &model);
        self.telemetry.record_quality(quality, &model);

        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        info!(
            tokens = tokens_used,
            cost = estimated_cost,
            latency_ms = latency_ms,
            quality = quality,
            "chat request served"
        );

        Ok(ChatResult {
            content: generation.text,
            tokens_used,
            estimated_cost,
            latency_ms,
            quality_score: quality,
            mode,
            model,
            timestamp: Utc::now(),
        })
    }
}
