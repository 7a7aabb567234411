//! Prometheus metrics for the brownout controller.
//!
//! ## Usage
//!
//! Build one [`PrometheusTelemetry`] at startup, share it as
//! `Arc<dyn TelemetrySink>` with the controller and the orchestrator, and
//! serve [`PrometheusTelemetry::gather_text`] from `/metrics`.
//!
//! Every recording helper swallows label errors, so observability degrades
//! gracefully instead of failing the operation being measured.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `balancer_tokens_used_total` | Counter | `model`, `mode` |
//! | `balancer_cost_per_request` | Histogram | `model` |
//! | `balancer_mode_activations_total` | Counter | `mode`, `source` |
//! | `balancer_request_duration_seconds` | Histogram | `route` |
//! | `balancer_response_quality` | Histogram | `model` |
//! | `balancer_errors_total` | Counter | `route`, `err_type` |
//! | `balancer_current_mode` | Gauge | — |

use std::collections::HashMap;
use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::mode::BrownoutMode;
use crate::telemetry::{TelemetrySink, TransitionSource};
use crate::BalancerError;

/// All Prometheus metrics for the balancer, bundled with their registry.
pub struct PrometheusTelemetry {
    registry: Registry,
    tokens_used: CounterVec,
    cost_per_request: HistogramVec,
    mode_activations: CounterVec,
    request_duration: HistogramVec,
    response_quality: HistogramVec,
    errors_total: CounterVec,
    current_mode: IntGauge,
}

impl std::fmt::Debug for PrometheusTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusTelemetry").finish_non_exhaustive()
    }
}

fn init_err(e: prometheus::Error) -> BalancerError {
    BalancerError::Other(format!("metrics init failed: {e}"))
}

fn register<C>(registry: &Registry, collector: C) -> Result<C, BalancerError>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| BalancerError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

impl PrometheusTelemetry {
    /// Create all metrics in a fresh private registry.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::Other`] if metric construction or
    /// registration fails.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn new() -> Result<Self, BalancerError> {
        Self::with_registry(Registry::new())
    }

    /// Create all metrics in `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::Other`] on duplicate descriptors.
    pub fn with_registry(registry: Registry) -> Result<Self, BalancerError> {
        let tokens_used = register(
            &registry,
            CounterVec::new(
                Opts::new("balancer_tokens_used_total", "Number of tokens consumed"),
                &["model", "mode"],
            )
            .map_err(init_err)?,
        )?;

        let cost_per_request = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "balancer_cost_per_request",
                    "Estimated cost per LLM request",
                )
                .buckets(vec![
                    0.000_001, 0.000_01, 0.000_1, 0.001, 0.01, 0.1, 1.0, 10.0,
                ]),
                &["model"],
            )
            .map_err(init_err)?,
        )?;

        let mode_activations = register(
            &registry,
            CounterVec::new(
                Opts::new(
                    "balancer_mode_activations_total",
                    "Count of brownout mode activations",
                ),
                &["mode", "source"],
            )
            .map_err(init_err)?,
        )?;

        let request_duration = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "balancer_request_duration_seconds",
                    "Generation call duration per route",
                ),
                &["route"],
            )
            .map_err(init_err)?,
        )?;

        let response_quality = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new("balancer_response_quality", "Heuristic response quality")
                    .buckets(vec![0.7, 0.75, 0.8, 0.85, 0.9, 0.95, 1.0]),
                &["model"],
            )
            .map_err(init_err)?,
        )?;

        let errors_total = register(
            &registry,
            CounterVec::new(
                Opts::new("balancer_errors_total", "Errors by route and type"),
                &["route", "err_type"],
            )
            .map_err(init_err)?,
        )?;

        let current_mode = register(
            &registry,
            IntGauge::new(
                "balancer_current_mode",
                "Active brownout mode severity (0 normal .. 3 emergency)",
            )
            .map_err(init_err)?,
        )?;

        Ok(Self {
            registry,
            tokens_used,
            cost_per_request,
            mode_activations,
            request_duration,
            response_quality,
            errors_total,
            current_mode,
        })
    }

    /// Gather all registered metric families.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Encode all metrics in the Prometheus text exposition format.
    ///
    /// Returns an empty string if encoding fails.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn gather_text(&self) -> String {
        let families = self.gather();
        if families.is_empty() {
            return String::new();
        }
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Mode activation counts keyed by `"mode:source"`.
    pub fn mode_activation_counts(&self) -> HashMap<String, u64> {
        use prometheus::core::Collector;

        let mut counts = HashMap::new();
        for family in self.mode_activations.collect() {
            for metric in family.get_metric() {
                let label = |name: &str| {
                    metric
                        .get_label()
                        .iter()
                        .find(|l| l.get_name() == name)
                        .map_or("unknown", |l| l.get_value())
                };
                let key = format!("{}:{}", label("mode"), label("source"));
                counts.insert(key, metric.get_counter().get_value() as u64);
            }
        }
        counts
    }
}

impl TelemetrySink for PrometheusTelemetry {
    fn record_tokens(&self, tokens: u64, model: &str, mode: BrownoutMode) {
        if let Ok(c) = self
            .tokens_used
            .get_metric_with_label_values(&[model, mode.as_str()])
        {
            c.inc_by(tokens as f64);
        }
    }

    fn record_cost(&self, cost: f64, model: &str) {
        if let Ok(h) = self.cost_per_request.get_metric_with_label_values(&[model]) {
            h.observe(cost);
        }
    }

    fn record_mode_activation(&self, mode: BrownoutMode, source: TransitionSource) {
        if let Ok(c) = self
            .mode_activations
            .get_metric_with_label_values(&[mode.as_str(), source.as_str()])
        {
            c.inc();
        }
    }

    fn record_latency(&self, route: &str, elapsed: Duration) {
        if let Ok(h) = self.request_duration.get_metric_with_label_values(&[route]) {
            h.observe(elapsed.as_secs_f64());
        }
    }

    fn record_quality(&self, score: f64, model: &str) {
        if let Ok(h) = self.response_quality.get_metric_with_label_values(&[model]) {
            h.observe(score);
        }
    }

    fn record_error(&self, route: &str, err_type: &str) {
        if let Ok(c) = self
            .errors_total
            .get_metric_with_label_values(&[route, err_type])
        {
            c.inc();
        }
    }

    fn set_current_mode(&self, mode: BrownoutMode) {
        self.current_mode.set(i64::from(mode.severity()));
    }
}
