//! Integration tests for `RequestOrchestrator`.
//!
//! Uses scripted workers to observe exactly what the orchestrator sends to
//! the generation capability and what it reports to telemetry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use open_balancer::orchestrator::CHAT_ROUTE;
use open_balancer::{
    BalancerError, BrownoutMode, ChatRequest, Credential, Generation, GenerationPolicy,
    ModeController, ModelWorker, OrchestratorSettings, RequestOrchestrator, TelemetrySink,
    TransitionSource,
};

// ============================================================================
// Scripted workers & sinks
// ============================================================================

#[derive(Debug, Clone)]
struct Call {
    prompt: String,
    policy: GenerationPolicy,
    credential: Credential,
}

/// Records every call and answers with a fixed generation.
struct ScriptedWorker {
    reply: Result<Generation, String>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    /// Switched to `Emergency` during the call, when set.
    flip: Option<Arc<ModeController>>,
}

impl ScriptedWorker {
    fn replying(text: &str) -> Self {
        Self {
            reply: Ok(Generation::text(text)),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            flip: None,
        }
    }

    fn failing(detail: &str) -> Self {
        Self {
            reply: Err(detail.to_string()),
            ..Self::replying("")
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ModelWorker for ScriptedWorker {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        policy: &GenerationPolicy,
        credential: &Credential,
    ) -> Result<Generation, BalancerError> {
        self.calls.lock().push(Call {
            prompt: prompt.to_string(),
            policy: policy.clone(),
            credential: credential.clone(),
        });
        if let Some(controller) = &self.flip {
            controller.set_mode(BrownoutMode::Emergency, TransitionSource::Manual, None);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply
            .clone()
            .map_err(BalancerError::UpstreamFailure)
    }
}

#[derive(Default)]
struct RecordingSink {
    tokens: Mutex<Vec<(u64, String, BrownoutMode)>>,
    costs: Mutex<Vec<f64>>,
    qualities: Mutex<Vec<f64>>,
    latencies: AtomicUsize,
    errors: Mutex<Vec<(String, String)>>,
}

impl TelemetrySink for RecordingSink {
    fn record_tokens(&self, tokens: u64, model: &str, mode: BrownoutMode) {
        self.tokens.lock().push((tokens, model.to_string(), mode));
    }

    fn record_cost(&self, cost: f64, _model: &str) {
        self.costs.lock().push(cost);
    }

    fn record_latency(&self, _route: &str, _elapsed: Duration) {
        self.latencies.fetch_add(1, Ordering::Relaxed);
    }

    fn record_quality(&self, score: f64, _model: &str) {
        self.qualities.lock().push(score);
    }

    fn record_error(&self, route: &str, err_type: &str) {
        self.errors
            .lock()
            .push((route.to_string(), err_type.to_string()));
    }
}

fn settings_with_key(key: Option<&str>) -> OrchestratorSettings {
    OrchestratorSettings {
        default_api_key: key.map(str::to_string),
        ..OrchestratorSettings::default()
    }
}

fn orchestrator(
    worker: Arc<ScriptedWorker>,
    controller: Arc<ModeController>,
    sink: Arc<RecordingSink>,
    settings: OrchestratorSettings,
) -> RequestOrchestrator {
    RequestOrchestrator::new(controller, worker)
        .with_telemetry(sink)
        .with_settings(settings)
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_hard_mode_request_uses_hard_policy_and_reports_metrics() {
    let controller = Arc::new(ModeController::new());
    controller.set_mode(BrownoutMode::Hard, TransitionSource::Manual, None);
    let worker = Arc::new(ScriptedWorker::replying(&"a".repeat(400)));
    let sink = Arc::new(RecordingSink::default());
    let orch = orchestrator(
        worker.clone(),
        controller,
        sink.clone(),
        settings_with_key(Some("default-key")),
    );

    let result = orch
        .handle(ChatRequest::new("summarise the incident", "incidents"))
        .await
        .expect("test: request succeeds");

    assert_eq!(worker.call_count(), 1);
    let call = worker.calls.lock()[0].clone();
    assert_eq!(call.policy.max_output_tokens, 200);
    assert!((call.policy.temperature - 0.3).abs() < f32::EPSILON);
    assert!(call.prompt.contains("Context: incidents"));
    assert!(call.prompt.ends_with("User: summarise the incident"));

    assert_eq!(result.mode, BrownoutMode::Hard);
    assert_eq!(result.model, "scripted");
    assert_eq!(result.tokens_used, 100);
    assert!((result.estimated_cost - 0.0001).abs() < 1e-12);
    assert!((result.quality_score - 0.78).abs() < 1e-9);
    assert!(result.latency_ms >= 0.0);

    assert_eq!(
        sink.tokens.lock().clone(),
        vec![(100, "scripted".to_string(), BrownoutMode::Hard)]
    );
    assert_eq!(sink.costs.lock().len(), 1);
    assert_eq!(sink.qualities.lock().len(), 1);
    assert_eq!(sink.latencies.load(Ordering::Relaxed), 1);
    assert!(sink.errors.lock().is_empty());
}

#[tokio::test]
async fn test_provider_reported_tokens_win_over_estimate() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker {
        reply: Ok(Generation {
            text: "abcd".to_string(),
            tokens_used: Some(77),
        }),
        ..ScriptedWorker::replying("")
    });
    let orch = orchestrator(
        worker,
        controller,
        Arc::new(RecordingSink::default()),
        OrchestratorSettings {
            unit_price_per_million: 2.0,
            ..settings_with_key(Some("k"))
        },
    );

    let result = orch
        .handle(ChatRequest::new("hi", "general"))
        .await
        .expect("test: request succeeds");
    assert_eq!(result.tokens_used, 77);
    assert!((result.estimated_cost - 77.0 / 1_000_000.0 * 2.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_mode_is_snapshotted_once_per_request() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker {
        flip: Some(controller.clone()),
        ..ScriptedWorker::replying("ok")
    });
    let sink = Arc::new(RecordingSink::default());
    let orch = orchestrator(
        worker.clone(),
        controller.clone(),
        sink.clone(),
        settings_with_key(Some("k")),
    );

    let result = orch
        .handle(ChatRequest::new("hi", "general"))
        .await
        .expect("test: request succeeds");

    assert_eq!(controller.mode(), BrownoutMode::Emergency);
    assert_eq!(result.mode, BrownoutMode::Normal);
    assert_eq!(worker.calls.lock()[0].policy.max_output_tokens, 1000);
    assert_eq!(sink.tokens.lock()[0].2, BrownoutMode::Normal);
}

// ============================================================================
// Credentials
// ============================================================================

#[tokio::test]
async fn test_request_credential_overrides_default() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker::replying("ok"));
    let orch = orchestrator(
        worker.clone(),
        controller,
        Arc::new(RecordingSink::default()),
        settings_with_key(Some("default-key")),
    );

    orch.handle(ChatRequest::new("hi", "general").with_credential("user-key"))
        .await
        .expect("test: request succeeds");
    assert_eq!(
        worker.calls.lock()[0].credential,
        Credential::ApiKey("user-key".to_string())
    );
}

#[tokio::test]
async fn test_ambient_auth_used_when_no_key_exists() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker::replying("ok"));
    let orch = orchestrator(
        worker.clone(),
        controller,
        Arc::new(RecordingSink::default()),
        OrchestratorSettings {
            ambient_auth: true,
            ..OrchestratorSettings::default()
        },
    );

    orch.handle(ChatRequest::new("hi", "general"))
        .await
        .expect("test: request succeeds");
    assert_eq!(worker.calls.lock()[0].credential, Credential::Ambient);
}

#[tokio::test]
async fn test_missing_credential_makes_zero_calls() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker::replying("never"));
    let sink = Arc::new(RecordingSink::default());
    let orch = orchestrator(
        worker.clone(),
        controller,
        sink.clone(),
        settings_with_key(None),
    );

    let err = orch
        .handle(ChatRequest::new("hi", "general"))
        .await
        .expect_err("test: must fail");
    assert!(matches!(err, BalancerError::CredentialMissing));
    assert_eq!(worker.call_count(), 0);
    assert!(sink.tokens.lock().is_empty());
    assert_eq!(
        sink.errors.lock().clone(),
        vec![(CHAT_ROUTE.to_string(), "credential_missing".to_string())]
    );
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_worker_failure_is_upstream_failure_without_retry() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker::failing("HTTP 503"));
    let sink = Arc::new(RecordingSink::default());
    let orch = orchestrator(
        worker.clone(),
        controller,
        sink.clone(),
        settings_with_key(Some("k")),
    );

    let err = orch
        .handle(ChatRequest::new("hi", "general"))
        .await
        .expect_err("test: must fail");
    match err {
        BalancerError::UpstreamFailure(detail) => assert!(detail.contains("HTTP 503")),
        other => panic!("expected UpstreamFailure, got {other:?}"),
    }
    assert_eq!(worker.call_count(), 1);
    assert!(sink.tokens.lock().is_empty());
    assert_eq!(sink.errors.lock()[0].1, "upstream_failure");
}

#[tokio::test]
async fn test_deadline_exceeded_is_upstream_failure() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker {
        delay: Duration::from_millis(500),
        ..ScriptedWorker::replying("late")
    });
    let orch = orchestrator(
        worker.clone(),
        controller,
        Arc::new(RecordingSink::default()),
        settings_with_key(Some("k")),
    );

    let err = orch
        .handle_with_deadline(ChatRequest::new("hi", "general"), Duration::from_millis(20))
        .await
        .expect_err("test: must time out");
    assert!(matches!(err, BalancerError::UpstreamFailure(ref d) if d.contains("timed out")));
    assert_eq!(worker.call_count(), 1);
}

#[tokio::test]
async fn test_configured_timeout_applies_to_handle() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker {
        delay: Duration::from_millis(500),
        ..ScriptedWorker::replying("late")
    });
    let orch = orchestrator(
        worker,
        controller,
        Arc::new(RecordingSink::default()),
        OrchestratorSettings {
            request_timeout: Duration::from_millis(20),
            ..settings_with_key(Some("k"))
        },
    );

    let err = orch
        .handle(ChatRequest::new("hi", "general"))
        .await
        .expect_err("test: must time out");
    assert!(matches!(err, BalancerError::UpstreamFailure(_)));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_each_see_a_valid_mode() {
    let controller = Arc::new(ModeController::new());
    let worker = Arc::new(ScriptedWorker::replying("ok"));
    let orch = Arc::new(orchestrator(
        worker.clone(),
        controller.clone(),
        Arc::new(RecordingSink::default()),
        settings_with_key(Some("k")),
    ));

    let flipper = {
        let controller = controller.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                let mode = BrownoutMode::ALL[i % 4];
                controller.set_mode(mode, TransitionSource::Manual, None);
                tokio::task::yield_now().await;
            }
        })
    };

    let mut handles = Vec::new();
    for _ in 0..50 {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move {
            orch.handle(ChatRequest::new("hi", "general")).await
        }));
    }

    for handle in handles {
        let result = handle
            .await
            .expect("test: task joined")
            .expect("test: request succeeds");
        assert!(BrownoutMode::ALL.contains(&result.mode));
    }
    flipper.await.expect("test: flipper joined");

    let calls = worker.calls.lock();
    assert_eq!(calls.len(), 50);
    for call in calls.iter() {
        let expected = [1000, 500, 200, 50];
        assert!(expected.contains(&call.policy.max_output_tokens));
    }
}
