//! # Mode Controller
//!
//! ## Responsibility
//! Own the process-wide brownout state: the active [`BrownoutMode`], the
//! [`ThresholdSet`], and a bounded audit log of transitions.
//!
//! ## Guarantees
//! - Exactly one mode is active at any instant
//! - Mode and thresholds share one lock; readers never observe a torn merge
//! - The lock is never held across `.await` points; only the mode gauge and
//!   the event send, neither of which blocks, run under it
//! - Any mode is a legal target from any other mode
//!
//! ## NOT Responsible For
//! - Deciding *when* to change mode (callers: manual API, `alert`, `health`)
//! - Deriving generation parameters (that belongs to `policy`)

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::mode::BrownoutMode;
use crate::telemetry::{NoopTelemetry, TelemetrySink, TransitionSource};
use crate::thresholds::{ThresholdError, ThresholdSet, ThresholdUpdate};

/// Transitions kept in the audit log before the oldest is evicted.
pub const DEFAULT_HISTORY_CAPACITY: usize = 128;

/// Buffered transition events per subscriber before lagging.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One recorded `set_mode` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeTransition {
    /// Mode active before the call.
    pub from: BrownoutMode,
    /// Mode requested by the call.
    pub to: BrownoutMode,
    /// Who asked for it.
    pub source: TransitionSource,
    /// Free-form reason, if one was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the swap happened.
    pub at: DateTime<Utc>,
}

impl ModeTransition {
    /// Whether the call actually changed the active mode.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug)]
struct ModeState {
    current: BrownoutMode,
    thresholds: ThresholdSet,
    history: VecDeque<ModeTransition>,
}

/// Explicitly constructed, shareable owner of the brownout state.
///
/// Wrap in an `Arc` at the composition root and hand clones to every
/// component that reads or changes the mode.
///
/// # Example
///
/// ```rust
/// use open_balancer::{BrownoutMode, ModeController, TransitionSource};
///
/// let controller = ModeController::new();
/// let previous = controller.set_mode(BrownoutMode::Hard, TransitionSource::Manual, None);
/// assert_eq!(previous, BrownoutMode::Normal);
/// assert_eq!(controller.mode(), BrownoutMode::Hard);
/// ```
pub struct ModeController {
    state: RwLock<ModeState>,
    history_capacity: usize,
    events: broadcast::Sender<ModeTransition>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for ModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ModeController")
            .field("current", &state.current)
            .field("thresholds", &state.thresholds)
            .field("history_len", &state.history.len())
            .finish()
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeController {
    /// Controller in `Normal` mode with default thresholds and no telemetry.
    pub fn new() -> Self {
        Self::with_telemetry(Arc::new(NoopTelemetry))
    }

    /// Controller in `Normal` mode with default thresholds reporting to `telemetry`.
    pub fn with_telemetry(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self::with_state(ThresholdSet::default(), telemetry)
    }

    /// Controller in `Normal` mode with the given thresholds.
    pub fn with_state(thresholds: ThresholdSet, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        telemetry.set_current_mode(BrownoutMode::Normal);
        Self {
            state: RwLock::new(ModeState {
                current: BrownoutMode::Normal,
                thresholds,
                history: VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY),
            }),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            events,
            telemetry,
        }
    }

    /// Override the audit log capacity. A capacity of zero keeps no history.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// The active mode.
    pub fn mode(&self) -> BrownoutMode {
        self.state.read().current
    }

    /// Swap in `mode` and return the mode that was active before.
    ///
    /// Every call is recorded in the audit log and counted as a mode
    /// activation; subscribers are only notified when the mode changed.
    pub fn set_mode(
        &self,
        mode: BrownoutMode,
        source: TransitionSource,
        reason: Option<String>,
    ) -> BrownoutMode {
        match self.swap(None, mode, source, reason) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// Swap in `mode` only if `expected` is still the active mode.
    ///
    /// # Errors
    ///
    /// Returns the active mode, untouched and unrecorded, when it is no
    /// longer `expected`.
    pub fn set_mode_if(
        &self,
        expected: BrownoutMode,
        mode: BrownoutMode,
        source: TransitionSource,
        reason: Option<String>,
    ) -> Result<BrownoutMode, BrownoutMode> {
        self.swap(Some(expected), mode, source, reason)
    }

    fn swap(
        &self,
        expected: Option<BrownoutMode>,
        mode: BrownoutMode,
        source: TransitionSource,
        reason: Option<String>,
    ) -> Result<BrownoutMode, BrownoutMode> {
        let transition = {
            let mut state = self.state.write();
            if let Some(expected) = expected {
                if state.current != expected {
                    return Err(state.current);
                }
            }
            let previous = std::mem::replace(&mut state.current, mode);
            let transition = ModeTransition {
                from: previous,
                to: mode,
                source,
                reason,
                at: Utc::now(),
            };
            if self.history_capacity > 0 {
                if state.history.len() >= self.history_capacity {
                    state.history.pop_front();
                }
                state.history.push_back(transition.clone());
            }
            // Gauge and event order must follow lock order; neither blocks.
            self.telemetry.set_current_mode(mode);
            if transition.changed() {
                // No subscribers is fine.
                let _ = self.events.send(transition.clone());
            }
            transition
        };

        self.telemetry.record_mode_activation(mode, source);

        if transition.changed() {
            info!(
                from = %transition.from,
                to = %transition.to,
                source = %source,
                reason = transition.reason.as_deref().unwrap_or(""),
                "brownout mode changed"
            );
        } else {
            debug!(mode = %mode, source = %source, "brownout mode re-asserted");
        }

        Ok(transition.from)
    }

    /// Owned copy of the current thresholds.
    pub fn thresholds(&self) -> ThresholdSet {
        self.state.read().thresholds.clone()
    }

    /// Mode and thresholds read under a single lock acquisition.
    pub fn snapshot(&self) -> (BrownoutMode, ThresholdSet) {
        let state = self.state.read();
        (state.current, state.thresholds.clone())
    }

    /// Merge `update` into the stored thresholds and return the full result.
    ///
    /// # Errors
    ///
    /// Returns [`ThresholdError`] if a key does not name a degraded mode; the
    /// stored set is left unchanged in that case.
    pub fn update_thresholds(
        &self,
        update: &ThresholdUpdate,
    ) -> Result<ThresholdSet, ThresholdError> {
        let merged = {
            let mut state = self.state.write();
            state.thresholds.merge(update)?;
            state.thresholds.clone()
        };
        info!(modes = update.len(), "brownout thresholds updated");
        Ok(merged)
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> Vec<ModeTransition> {
        self.state.read().history.iter().cloned().collect()
    }

    /// Receive every future transition that changes the mode.
    pub fn subscribe(&self) -> broadcast::Receiver<ModeTransition> {
        self.events.subscribe()
    }
}
