//! Optional closed-loop health evaluation.
//!
//! Reported health samples are kept in a sliding window, aggregated, and
//! compared against the controller's [`ThresholdSet`]. The result is always
//! returned as a suggestion; it is only applied when the loop is enabled and
//! the same suggestion has been seen on several consecutive observations.
//!
//! Aggregation over the window:
//! - latency: maximum of the reported p95 values
//! - error rate: mean
//! - cost per hour: mean

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::controller::ModeController;
use crate::mode::BrownoutMode;
use crate::telemetry::TransitionSource;
use crate::thresholds::ThresholdSet;

/// One health reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HealthSample {
    /// Observed 95th percentile latency in milliseconds.
    #[serde(rename = "latency_p95")]
    pub latency_p95_ms: f64,
    /// Observed error rate, fraction in `[0, 1]`.
    pub error_rate: f64,
    /// Observed spend per hour.
    #[serde(rename = "token_cost_per_hour")]
    pub cost_per_hour: f64,
}

/// The most severe mode whose thresholds `sample` meets or exceeds.
///
/// A mode triggers when any one of its three values is reached. Modes with
/// no stored thresholds never trigger.
pub fn evaluate(sample: &HealthSample, thresholds: &ThresholdSet) -> BrownoutMode {
    thresholds
        .iter()
        .filter(|(_, t)| {
            sample.latency_p95_ms >= t.latency_p95_ms
                || sample.error_rate >= t.error_rate
                || sample.cost_per_hour >= t.cost_ceiling
        })
        .map(|(mode, _)| mode)
        .max()
        .unwrap_or(BrownoutMode::Normal)
}

/// Closed-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClosedLoopConfig {
    /// Apply suggestions to the controller. Off by default.
    #[serde(default)]
    pub enabled: bool,
    /// Samples kept in the sliding window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Identical consecutive suggestions required before switching.
    #[serde(default = "default_consecutive_readings")]
    pub consecutive_readings: usize,
}

fn default_window_size() -> usize {
    12
}

fn default_consecutive_readings() -> usize {
    3
}

impl Default for ClosedLoopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_size: default_window_size(),
            consecutive_readings: default_consecutive_readings(),
        }
    }
}

/// What the monitor concluded from one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthVerdict {
    /// Mode the aggregated window points to.
    pub suggested_mode: BrownoutMode,
    /// Mode in effect after this observation.
    pub current_mode: BrownoutMode,
    /// Whether this observation switched the controller.
    pub applied: bool,
    /// Samples currently in the window.
    pub window_len: usize,
    /// Aggregated window the suggestion was derived from.
    pub aggregate: HealthSample,
}

#[derive(Debug)]
struct Window {
    samples: VecDeque<HealthSample>,
    streak_mode: Option<BrownoutMode>,
    streak_len: usize,
}

impl Window {
    fn aggregate(&self) -> HealthSample {
        let n = self.samples.len().max(1) as f64;
        let latency = self
            .samples
            .iter()
            .map(|s| s.latency_p95_ms)
            .fold(0.0_f64, f64::max);
        let error_rate = self.samples.iter().map(|s| s.error_rate).sum::<f64>() / n;
        let cost = self.samples.iter().map(|s| s.cost_per_hour).sum::<f64>() / n;
        HealthSample {
            latency_p95_ms: latency,
            error_rate,
            cost_per_hour: cost,
        }
    }
}

/// Sliding-window evaluator that can drive a [`ModeController`].
pub struct HealthMonitor {
    controller: Arc<ModeController>,
    config: ClosedLoopConfig,
    window: Mutex<Window>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Monitor for `controller`. Zero-valued sizes are raised to one.
    pub fn new(controller: Arc<ModeController>, mut config: ClosedLoopConfig) -> Self {
        config.window_size = config.window_size.max(1);
        config.consecutive_readings = config.consecutive_readings.max(1);
        Self {
            controller,
            window: Mutex::new(Window {
                samples: VecDeque::with_capacity(config.window_size),
                streak_mode: None,
                streak_len: 0,
            }),
            config,
        }
    }

    /// Whether suggestions are applied.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record `sample` and, when enabled, act on the window's suggestion.
    pub fn observe(&self, sample: HealthSample) -> HealthVerdict {
        let (mode_now, thresholds) = self.controller.snapshot();

        let (aggregate, suggested, streak_len, window_len) = {
            let mut window = self.window.lock();
            if window.samples.len() >= self.config.window_size {
                window.samples.pop_front();
            }
            window.samples.push_back(sample);

            let aggregate = window.aggregate();
            let suggested = evaluate(&aggregate, &thresholds);
            if window.streak_mode == Some(suggested) {
                window.streak_len += 1;
            } else {
                window.streak_mode = Some(suggested);
                window.streak_len = 1;
            }
            (aggregate, suggested, window.streak_len, window.samples.len())
        };

        let should_apply = self.config.enabled
            && suggested != mode_now
            && streak_len >= self.config.consecutive_readings;

        let (applied, current_mode) = if should_apply {
            let reason = format!(
                "window p95={:.0}ms err={:.3} cost={:.2}",
                aggregate.latency_p95_ms, aggregate.error_rate, aggregate.cost_per_hour
            );
            match self.controller.set_mode_if(
                mode_now,
                suggested,
                TransitionSource::HealthEvaluation,
                Some(reason),
            ) {
                Ok(_) => {
                    info!(from = %mode_now, to = %suggested, "health loop switched mode");
                    (true, suggested)
                }
                Err(newer) => {
                    debug!(
                        suggested = %suggested,
                        current = %newer,
                        "mode changed during evaluation, suggestion dropped"
                    );
                    (false, newer)
                }
            }
        } else {
            debug!(
                suggested = %suggested,
                current = %mode_now,
                streak = streak_len,
                enabled = self.config.enabled,
                "health sample evaluated"
            );
            (false, mode_now)
        };

        HealthVerdict {
            suggested_mode: suggested,
            current_mode,
            applied,
            window_len,
            aggregate,
        }
    }
}
