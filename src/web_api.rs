//! Web API Server
//!
//! HTTP surface for the brownout controller, the chat orchestrator, and the
//! alert webhook.
//!
//! ## Endpoints
//!
//! ### REST API
//! - `POST /api/ai-chat` — Serve one chat request under the current mode
//! - `GET  /api/brownout` — Current mode, thresholds, model settings
//! - `POST /api/brownout` — Manually set the mode
//! - `PUT  /api/brownout` — Merge threshold updates
//! - `GET  /api/brownout/history` — Recent mode transitions
//! - `POST /api/webhooks/datadog/brownout` — Alert webhook
//! - `GET  /api/webhooks/datadog/brownout` — Webhook liveness probe
//! - `POST /api/metrics` — Report a health sample to the closed loop
//! - `GET  /health` — Health check
//! - `GET  /metrics` — Prometheus metrics
//!
//! ### WebSocket
//! - `WS /api/brownout/events` — Live mode transitions

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket},
        DefaultBodyLimit, State, WebSocketUpgrade,
    },
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alert::{AlertEvent, AlertIngestor, IngestOutcome};
use crate::config::ServerConfig;
use crate::controller::ModeController;
use crate::health::{HealthMonitor, HealthSample, HealthVerdict};
use crate::metrics::PrometheusTelemetry;
use crate::mode::BrownoutMode;
use crate::orchestrator::{ChatRequest, ChatResult, RequestOrchestrator};
use crate::telemetry::TransitionSource;
use crate::thresholds::ThresholdUpdate;
use crate::BalancerError;

/// Interval between keepalive pings on the events socket.
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Reason recorded for manual mode changes that carry none.
pub const DEFAULT_MANUAL_REASON: &str = "Manual override";

// ============================================================================
// State & Request Types
// ============================================================================

/// Shared state behind every handler.
pub struct AppState {
    /// Mode and threshold store.
    pub controller: Arc<ModeController>,
    /// Alert webhook relay.
    pub ingestor: AlertIngestor,
    /// Chat pipeline.
    pub orchestrator: RequestOrchestrator,
    /// Closed-loop evaluator.
    pub health: HealthMonitor,
    /// Metrics served on `/metrics`.
    pub telemetry: Arc<PrometheusTelemetry>,
}

impl AppState {
    /// Bundle the components built by the composition root.
    pub fn new(
        controller: Arc<ModeController>,
        orchestrator: RequestOrchestrator,
        health: HealthMonitor,
        telemetry: Arc<PrometheusTelemetry>,
    ) -> Self {
        Self {
            ingestor: AlertIngestor::new(controller.clone()),
            controller,
            orchestrator,
            health,
            telemetry,
        }
    }
}

/// JSON body for `POST /api/brownout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetModeRequest {
    /// Target mode label.
    pub mode: String,
    /// Free-form reason stored in the transition log.
    #[serde(default)]
    pub reason: Option<String>,
}

/// JSON body for `PUT /api/brownout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsRequest {
    /// Partial update keyed by mode label.
    pub thresholds: ThresholdUpdate,
}

// ============================================================================
// Server Setup
// ============================================================================

/// Build the router over `state`.
///
/// Exposed separately from [`start_server`] so tests can bind their own
/// listener.
pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/api/ai-chat", post(chat_handler))
        .route(
            "/api/brownout",
            get(brownout_status_handler)
                .post(set_mode_handler)
                .put(update_thresholds_handler),
        )
        .route("/api/brownout/history", get(history_handler))
        .route("/api/brownout/events", get(events_handler))
        .route(
            "/api/webhooks/datadog/brownout",
            post(alert_webhook_handler).get(webhook_health_handler),
        )
        .route("/api/metrics", post(health_sample_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(config.max_request_size))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn_with_state(
            config.max_request_size,
            body_size_middleware,
        ))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeout_seconds)))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.allowed_origins))
        .with_state(state)
}

/// CORS policy for the configured origins.
///
/// A `"*"` entry allows any origin without credentials. Otherwise only the
/// listed origins are allowed, with credentials, and methods and headers
/// are mirrored from the preflight request.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "skipping unusable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Start the web API server and serve until the process exits.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
///
/// # Panics
///
/// This function never panics.
pub async fn start_server(
    config: ServerConfig,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = router(state, &config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Web API ready on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

/// Adds a unique `X-Request-ID` header to every response.
///
/// If the client sends an `X-Request-ID` header, it is preserved; otherwise
/// a new UUID v4 is generated.
async fn request_id_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Rejects requests whose `Content-Length` exceeds `max_size` with 413.
async fn body_size_middleware(
    State(max_size): State<usize>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(content_length) = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if content_length > max_size {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({"error": "Request body too large"})),
            )
                .into_response();
        }
    }

    next.run(req).await
}

// ============================================================================
// Chat
// ============================================================================

/// `POST /api/ai-chat`
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResult>, AppError> {
    if req.message.trim().is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }
    let result = state.orchestrator.handle(req).await?;
    Ok(Json(result))
}

// ============================================================================
// Brownout Control
// ============================================================================

/// `GET /api/brownout`
async fn brownout_status_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (mode, thresholds) = state.controller.snapshot();
    let settings = state.orchestrator.settings();
    Json(serde_json::json!({
        "current_mode": mode,
        "thresholds": thresholds,
        "llm_config": {
            "model": state.orchestrator.model(),
            "unit_price_per_million": settings.unit_price_per_million,
            "request_timeout_ms": settings.request_timeout.as_millis() as u64,
        },
        "closed_loop_enabled": state.health.enabled(),
        "timestamp": Utc::now(),
    }))
}

/// `POST /api/brownout`
async fn set_mode_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetModeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mode: BrownoutMode = req.mode.parse().map_err(BalancerError::from)?;
    let reason = req
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MANUAL_REASON.to_string());

    let previous = state
        .controller
        .set_mode(mode, TransitionSource::Manual, Some(reason.clone()));

    Ok(Json(serde_json::json!({
        "status": "success",
        "previous_mode": previous,
        "new_mode": mode,
        "reason": reason,
        "timestamp": Utc::now(),
    })))
}

/// `PUT /api/brownout`
async fn update_thresholds_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ThresholdsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state
        .controller
        .update_thresholds(&req.thresholds)
        .map_err(BalancerError::from)?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "updated_thresholds": updated,
        "timestamp": Utc::now(),
    })))
}

/// `GET /api/brownout/history`
async fn history_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let transitions = state.controller.history();
    Json(serde_json::json!({
        "count": transitions.len(),
        "transitions": transitions,
    }))
}

// ============================================================================
// Alert Webhook
// ============================================================================

/// `POST /api/webhooks/datadog/brownout`
///
/// Always answers 200; unusable payloads are reported as `ignored`.
async fn alert_webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let event: AlertEvent = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "malformed alert payload");
            return Json(serde_json::json!({
                "status": "ignored",
                "reason": format!("malformed alert payload: {e}"),
            }));
        }
    };

    match state.ingestor.ingest(&event) {
        IngestOutcome::Applied(mode) => Json(serde_json::json!({
            "status": "success",
            "brownout_mode": mode,
            "alert_id": event.alert_id,
            "timestamp": Utc::now(),
        })),
        IngestOutcome::Ignored(reason) => Json(serde_json::json!({
            "status": "ignored",
            "reason": reason.to_string(),
        })),
    }
}

/// `GET /api/webhooks/datadog/brownout`
async fn webhook_health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "current_mode": state.controller.mode(),
        "timestamp": Utc::now(),
    }))
}

// ============================================================================
// Closed Loop
// ============================================================================

/// `POST /api/metrics`
async fn health_sample_handler(
    State(state): State<Arc<AppState>>,
    Json(sample): Json<HealthSample>,
) -> Json<HealthVerdict> {
    Json(state.health.observe(sample))
}

// ============================================================================
// Mode Event Stream
// ============================================================================

/// `WS /api/brownout/events`
async fn events_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| events_stream(socket, state))
}

/// Send the current mode, then every transition until the client leaves.
async fn events_stream(mut socket: WebSocket, state: Arc<AppState>) {
    let mut events = state.controller.subscribe();
    info!("mode event subscriber connected");

    let hello = serde_json::json!({
        "current_mode": state.controller.mode(),
        "timestamp": Utc::now(),
    })
    .to_string();
    if socket.send(Message::Text(hello)).await.is_err() {
        return;
    }

    let mut ping_interval = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(transition) => {
                        let text = match serde_json::to_string(&transition) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "failed to encode transition");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "mode event subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error");
                        break;
                    }
                    _ => {}
                }
            }
            _ = ping_interval.tick() => {
                if socket.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("mode event subscriber disconnected");
}

// ============================================================================
// Utility Handlers
// ============================================================================

/// `GET /health`
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "current_mode": state.controller.mode(),
    }))
}

/// `GET /metrics`
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.telemetry.gather_text(),
    )
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by API handlers.
#[derive(Debug)]
pub enum AppError {
    /// The request body was well-formed JSON but semantically unusable.
    BadRequest(String),
    /// A domain error.
    Balancer(BalancerError),
}

impl From<BalancerError> for AppError {
    fn from(e: BalancerError) -> Self {
        AppError::Balancer(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": message})),
            )
                .into_response(),
            AppError::Balancer(BalancerError::InvalidMode(e)) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": e.to_string(),
                    "valid_modes": BrownoutMode::ALL,
                })),
            )
                .into_response(),
            AppError::Balancer(e) => {
                let status = match &e {
                    BalancerError::CredentialMissing | BalancerError::InvalidThresholds(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    BalancerError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
