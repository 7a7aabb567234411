//! Telemetry sink abstraction.
//!
//! The core reports counters and histogram observations through
//! [`TelemetrySink`]. Every method returns `()`: a sink that cannot record
//! must drop the observation silently, so telemetry can never fail the
//! operation that produced it.
//!
//! The Prometheus-backed implementation lives in [`crate::metrics`].

use std::time::Duration;

use crate::mode::BrownoutMode;

/// Where a mode transition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionSource {
    /// An operator called the mode-write endpoint.
    Manual,
    /// An external monitoring system sent a tagged alert.
    ExternalAlert,
    /// The optional closed loop evaluated reported health samples.
    HealthEvaluation,
}

impl TransitionSource {
    /// Label value used in metrics and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            TransitionSource::Manual => "manual",
            TransitionSource::ExternalAlert => "external-alert",
            TransitionSource::HealthEvaluation => "health-evaluation",
        }
    }
}

impl std::fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver for the counters and histograms the core emits.
///
/// Implementations must be cheap and non-blocking; they are called inline on
/// the request path. All methods default to no-ops.
pub trait TelemetrySink: Send + Sync {
    /// Tokens consumed by one generation.
    fn record_tokens(&self, _tokens: u64, _model: &str, _mode: BrownoutMode) {}

    /// Estimated cost of one generation.
    fn record_cost(&self, _cost: f64, _model: &str) {}

    /// A `set_mode` call took effect.
    fn record_mode_activation(&self, _mode: BrownoutMode, _source: TransitionSource) {}

    /// Wall-clock duration of a routed operation.
    fn record_latency(&self, _route: &str, _elapsed: Duration) {}

    /// Heuristic quality score of one response.
    fn record_quality(&self, _score: f64, _model: &str) {}

    /// A request-local failure.
    fn record_error(&self, _route: &str, _err_type: &str) {}

    /// The mode now in effect.
    fn set_current_mode(&self, _mode: BrownoutMode) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_labels() {
        assert_eq!(TransitionSource::Manual.as_str(), "manual");
        assert_eq!(TransitionSource::ExternalAlert.to_string(), "external-alert");
        let json = serde_json::to_string(&TransitionSource::HealthEvaluation).expect("test: ser");
        assert_eq!(json, "\"health-evaluation\"");
    }

    #[test]
    fn test_noop_sink_accepts_everything() {
        let sink = NoopTelemetry;
        sink.record_tokens(10, "m", BrownoutMode::Hard);
        sink.record_cost(0.5, "m");
        sink.record_mode_activation(BrownoutMode::Soft, TransitionSource::Manual);
        sink.record_latency("chat", Duration::from_millis(3));
        sink.record_quality(0.9, "m");
        sink.record_error("chat", "upstream");
        sink.set_current_mode(BrownoutMode::Normal);
    }
}
