//! open-balancer server binary
//!
//! Loads configuration, wires the controller, orchestrator, and health loop
//! together, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```text
//! open-balancer [--config balancer.toml] [--print-schema]
//! ```
//!
//! ## Environment Variables
//!
//! - `GEMINI_API_KEY`, `GOOGLE_CLOUD_PROJECT`, `GOOGLE_CLOUD_LOCATION`,
//!   `GOOGLE_CLOUD_ACCESS_TOKEN`, `BALANCER_PORT` override the config file
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use open_balancer::config::{self, loader, LlmConfig, ProviderKind};
use open_balancer::metrics::PrometheusTelemetry;
use open_balancer::web_api::{self, AppState};
use open_balancer::worker::VertexTarget;
use open_balancer::{
    init_tracing_with, EchoWorker, GeminiWorker, HealthMonitor, ModeController, ModelWorker,
    RequestOrchestrator, TelemetrySink,
};
use tracing::{info, warn};

/// Parsed command-line arguments.
struct Args {
    config: Option<PathBuf>,
    print_schema: bool,
}

/// Parse command-line arguments manually (no external arg parser dependency).
fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = None;
    let mut print_schema = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a value".to_string());
                }
                config = Some(PathBuf::from(&args[i]));
            }
            "--print-schema" => {
                print_schema = true;
            }
            "--help" | "-h" => {
                return Err(usage());
            }
            other => {
                return Err(format!("unknown argument: {other}\n{}", usage()));
            }
        }
        i += 1;
    }

    Ok(Args {
        config,
        print_schema,
    })
}

fn usage() -> String {
    "usage: open-balancer [--config <file.toml>] [--print-schema]".to_string()
}

/// Build the generation backend named by `llm`.
fn build_worker(llm: &LlmConfig) -> Arc<dyn ModelWorker> {
    match llm.provider {
        ProviderKind::Echo => Arc::new(EchoWorker::new()),
        ProviderKind::Gemini => {
            let mut worker = GeminiWorker::new(llm.model.clone())
                .with_timeout(Duration::from_millis(llm.request_timeout_ms));
            if let Some(base_url) = &llm.base_url {
                worker = worker.with_base_url(base_url.clone());
            }
            if let Some(project) = &llm.vertex_project {
                worker = worker.with_vertex(VertexTarget {
                    project: project.clone(),
                    location: llm.vertex_location.clone(),
                    access_token: llm.vertex_access_token.clone(),
                    base_url: None,
                });
            }
            Arc::new(worker)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = parse_args()?;

    if args.print_schema {
        println!("{}", config::export_schema()?);
        return Ok(());
    }

    let config = loader::load(args.config.as_deref())?;
    if let Err(e) = init_tracing_with(config.observability.log_format.as_str()) {
        eprintln!("tracing already initialised: {e}");
    }

    info!(
        port = config.server.port,
        provider = ?config.llm.provider,
        model = %config.llm.model,
        closed_loop = config.closed_loop.enabled,
        "starting open-balancer"
    );

    let telemetry = Arc::new(PrometheusTelemetry::new()?);
    let sink: Arc<dyn TelemetrySink> = telemetry.clone();

    let controller = Arc::new(ModeController::with_state(
        config.thresholds.clone(),
        sink.clone(),
    ));

    let settings = config.llm.orchestrator_settings();
    if settings.default_api_key.is_none() && !settings.ambient_auth {
        warn!("no default API key or ambient auth configured; chat requests must carry apiKey");
    }

    let orchestrator = RequestOrchestrator::new(controller.clone(), build_worker(&config.llm))
        .with_telemetry(sink)
        .with_settings(settings);
    let health = HealthMonitor::new(controller.clone(), config.closed_loop.clone());

    let state = Arc::new(AppState::new(controller, orchestrator, health, telemetry));
    web_api::start_server(config.server, state).await
}
