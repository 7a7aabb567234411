//! Generation capability abstraction and implementations
//!
//! Provides the [`ModelWorker`] trait and two implementations:
//! - [`EchoWorker`]: testing/demo worker, no network
//! - [`GeminiWorker`]: Google Generative Language API, with a Vertex AI path
//!   for ambient (project-level) credentials
//!
//! Workers are provider adapters only. Credential selection happens in the
//! orchestrator; the worker receives the resolved [`Credential`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::policy::GenerationPolicy;
use crate::BalancerError;

/// Default Generative Language API root.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model identity.
pub const DEFAULT_MODEL: &str = "gemini-pro";

/// A credential the orchestrator resolved for one request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// An explicit API key (per-request override or process default).
    ApiKey(String),
    /// No key; the worker authenticates with its own ambient identity.
    Ambient,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credential::Ambient => f.write_str("Ambient"),
        }
    }
}

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Generated text.
    pub text: String,
    /// Token count reported by the provider, when it reports one.
    pub tokens_used: Option<u64>,
}

impl Generation {
    /// Generation without a provider-reported token count.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
        }
    }
}

/// The generation capability.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via `Arc<dyn ModelWorker>`.
#[async_trait]
pub trait ModelWorker: Send + Sync {
    /// Model identity used to tag metrics and results.
    fn model(&self) -> &str;

    /// Generate a completion for `prompt` shaped by `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::UpstreamFailure`] on any provider error.
    async fn generate(
        &self,
        prompt: &str,
        policy: &GenerationPolicy,
        credential: &Credential,
    ) -> Result<Generation, BalancerError>;
}

// ============================================================================
// Echo Worker (Testing)
// ============================================================================

/// Dummy echo worker for testing
///
/// Returns the `User:` part of the prompt, cut to the policy's output cap in
/// whitespace-separated words. Lets the service run without a provider.
pub struct EchoWorker {
    /// Simulated generation delay
    pub delay_ms: u64,
}

impl EchoWorker {
    /// Echo worker with a 10ms delay.
    pub fn new() -> Self {
        Self { delay_ms: 10 }
    }

    /// Echo worker with a custom delay.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelWorker for EchoWorker {
    fn model(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        prompt: &str,
        policy: &GenerationPolicy,
        _credential: &Credential,
    ) -> Result<Generation, BalancerError> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;

        let message = prompt
            .rsplit_once("User: ")
            .map_or(prompt, |(_, message)| message);
        let text = message
            .split_whitespace()
            .take(policy.max_output_tokens as usize)
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Generation::text(text))
    }
}

// ============================================================================
// Gemini Worker
// ============================================================================

/// `generateContent` request payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

/// `generateContent` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: Option<u64>,
}

/// Vertex AI project identity used for [`Credential::Ambient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexTarget {
    /// GCP project id.
    pub project: String,
    /// GCP region, e.g. `us-central1`.
    pub location: String,
    /// OAuth access token sent as a bearer token.
    pub access_token: Option<String>,
    /// API root override; defaults to the regional endpoint.
    pub base_url: Option<String>,
}

impl VertexTarget {
    fn endpoint(&self, model: &str) -> String {
        let root = self
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com/v1", self.location));
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            root, self.project, self.location, model
        )
    }
}

/// Google Gemini worker.
///
/// [`Credential::ApiKey`] goes to the Generative Language API;
/// [`Credential::Ambient`] goes to Vertex AI and requires a [`VertexTarget`].
///
/// ## Example
///
/// ```no_run
/// use open_balancer::GeminiWorker;
/// use std::time::Duration;
///
/// let worker = GeminiWorker::new("gemini-pro").with_timeout(Duration::from_secs(20));
/// ```
pub struct GeminiWorker {
    client: reqwest::Client,
    model: String,
    base_url: String,
    vertex: Option<VertexTarget>,
    timeout: Duration,
}

impl GeminiWorker {
    /// Create a new Gemini worker for `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            vertex: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Override the Generative Language API root (useful for testing).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Enable the ambient Vertex AI path.
    pub fn with_vertex(mut self, vertex: VertexTarget) -> Self {
        self.vertex = Some(vertex);
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether this worker can serve [`Credential::Ambient`].
    pub fn supports_ambient(&self) -> bool {
        self.vertex.is_some()
    }

    fn request_body(prompt: &str, policy: &GenerationPolicy) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: policy.temperature,
                max_output_tokens: policy.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl ModelWorker for GeminiWorker {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        policy: &GenerationPolicy,
        credential: &Credential,
    ) -> Result<Generation, BalancerError> {
        let body = Self::request_body(prompt, policy);

        let request = match credential {
            Credential::ApiKey(key) => self
                .client
                .post(format!(
                    "{}/models/{}:generateContent",
                    self.base_url, self.model
                ))
                .query(&[("key", key.as_str())]),
            Credential::Ambient => {
                let vertex = self.vertex.as_ref().ok_or_else(|| {
                    BalancerError::UpstreamFailure(
                        "ambient credential requested but Vertex AI is not configured".to_string(),
                    )
                })?;
                let request = self.client.post(vertex.endpoint(&self.model));
                match &vertex.access_token {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            }
        };

        let response = request
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| BalancerError::UpstreamFailure(format!("Gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BalancerError::UpstreamFailure(format!(
                "Gemini API error {status}: {error_text}"
            )));
        }

        let api_response: GenerateContentResponse = response.json().await.map_err(|e| {
            BalancerError::UpstreamFailure(format!("Failed to parse response: {e}"))
        })?;

        let content = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or_else(|| {
                BalancerError::UpstreamFailure("No candidates in Gemini response".to_string())
            })?;

        let text: String = content.parts.into_iter().map(|p| p.text).collect();

        Ok(Generation {
            text,
            tokens_used: api_response
                .usage_metadata
                .and_then(|u| u.total_token_count),
        })
    }
}
