//! Alert webhook ingestion.
//!
//! ## Responsibility
//! Turn an inbound monitoring alert into a mode command. The directive is
//! carried in a tag of the form `brownout:<mode>`.
//!
//! ## Guarantees
//! - Only alerts whose transition is exactly `"Triggered"` are acted on
//! - The first `brownout:` tag wins; later ones are ignored
//! - Malformed input resolves to [`IngestOutcome::Ignored`], never an error,
//!   and never mutates the controller
//!
//! ## NOT Responsible For
//! - Authenticating the sender (transport concern)
//! - Evaluating thresholds (this is a pure command relay)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::controller::ModeController;
use crate::mode::BrownoutMode;
use crate::telemetry::TransitionSource;

/// Transition marker for a firing alert.
pub const TRIGGERED: &str = "Triggered";

/// Tag prefix carrying a mode directive.
pub const DIRECTIVE_PREFIX: &str = "brownout:";

/// Inbound alert payload.
///
/// Fields the ingestor reads are typed; everything else the monitoring system
/// sends is kept in [`AlertEvent::extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Upstream alert identifier.
    #[serde(default)]
    pub alert_id: Option<String>,
    /// Alert state transition, e.g. `"Triggered"` or `"Recovered"`.
    #[serde(default)]
    pub alert_transition: Option<String>,
    /// Alert tags, scanned in order for a directive.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    /// Human-readable alert title.
    #[serde(default)]
    pub title: Option<String>,
    /// Unrecognised payload fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AlertEvent {
    /// A triggered alert carrying `tags`.
    pub fn triggered<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            alert_transition: Some(TRIGGERED.to_string()),
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// The value of the first `brownout:` tag, if any.
    ///
    /// The value stops at the next `:`, so `brownout:hard:eu` yields `hard`.
    pub fn directive(&self) -> Option<&str> {
        self.tags.iter().find_map(|tag| {
            tag.strip_prefix(DIRECTIVE_PREFIX)
                .map(|rest| rest.split(':').next().unwrap_or(rest))
        })
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Why an alert was not acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The alert is not firing.
    NotTriggered,
    /// No usable `brownout:` tag.
    NoDirective,
    /// The directive names no mode.
    InvalidMode(String),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::NotTriggered => f.write_str("not a triggered alert"),
            IgnoreReason::NoDirective => f.write_str("no brownout directive in tags"),
            IgnoreReason::InvalidMode(value) => write!(f, "invalid mode {value}"),
        }
    }
}

/// Result of ingesting one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The controller was switched to this mode.
    Applied(BrownoutMode),
    /// Nothing happened.
    Ignored(IgnoreReason),
}

/// Relays alert directives to a [`ModeController`].
#[derive(Debug, Clone)]
pub struct AlertIngestor {
    controller: Arc<ModeController>,
}

impl AlertIngestor {
    /// Ingestor driving `controller`.
    pub fn new(controller: Arc<ModeController>) -> Self {
        Self { controller }
    }

    /// Act on `event`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn ingest(&self, event: &AlertEvent) -> IngestOutcome {
        if event.alert_transition.as_deref() != Some(TRIGGERED) {
            return self.ignore(event, IgnoreReason::NotTriggered);
        }

        let value = match event.directive() {
            Some(v) if !v.is_empty() => v,
            _ => return self.ignore(event, IgnoreReason::NoDirective),
        };

        let mode: BrownoutMode = match value.parse() {
            Ok(mode) => mode,
            Err(_) => return self.ignore(event, IgnoreReason::InvalidMode(value.to_string())),
        };

        let reason = event
            .title
            .clone()
            .or_else(|| event.alert_id.as_ref().map(|id| format!("alert {id}")));
        let previous = self
            .controller
            .set_mode(mode, TransitionSource::ExternalAlert, reason);

        info!(
            alert_id = event.alert_id.as_deref().unwrap_or(""),
            from = %previous,
            to = %mode,
            "alert applied brownout mode"
        );
        IngestOutcome::Applied(mode)
    }

    fn ignore(&self, event: &AlertEvent, reason: IgnoreReason) -> IngestOutcome {
        if matches!(reason, IgnoreReason::InvalidMode(_)) {
            warn!(
                alert_id = event.alert_id.as_deref().unwrap_or(""),
                reason = %reason,
                "alert carried an unusable directive"
            );
        } else {
            info!(
                alert_id = event.alert_id.as_deref().unwrap_or(""),
                reason = %reason,
                "alert ignored"
            );
        }
        IngestOutcome::Ignored(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingestor() -> (AlertIngestor, Arc<ModeController>) {
        let controller = Arc::new(ModeController::new());
        (AlertIngestor::new(controller.clone()), controller)
    }

    #[test]
    fn test_non_triggered_alert_is_ignored_regardless_of_tags() {
        let (ingestor, controller) = ingestor();
        for transition in [Some("Recovered"), Some("No Data"), Some("triggered"), None] {
            let event = AlertEvent {
                alert_transition: transition.map(str::to_string),
                tags: vec!["brownout:emergency".to_string()],
                ..AlertEvent::default()
            };
            assert_eq!(
                ingestor.ingest(&event),
                IngestOutcome::Ignored(IgnoreReason::NotTriggered)
            );
        }
        assert_eq!(controller.mode(), BrownoutMode::Normal);
        assert!(controller.history().is_empty());
    }

    #[test]
    fn test_first_directive_wins() {
        let (ingestor, controller) = ingestor();
        let event = AlertEvent::triggered(["env:prod", "brownout:hard", "brownout:emergency"]);
        assert_eq!(
            ingestor.ingest(&event),
            IngestOutcome::Applied(BrownoutMode::Hard)
        );
        assert_eq!(controller.mode(), BrownoutMode::Hard);
    }

    #[test]
    fn test_missing_directive_is_ignored() {
        let (ingestor, controller) = ingestor();
        let event = AlertEvent::triggered(["env:prod", "team:sre"]);
        let outcome = ingestor.ingest(&event);
        assert_eq!(outcome, IngestOutcome::Ignored(IgnoreReason::NoDirective));
        assert_eq!(controller.mode(), BrownoutMode::Normal);
    }

    #[test]
    fn test_empty_directive_is_treated_as_missing() {
        let (ingestor, _) = ingestor();
        let event = AlertEvent::triggered(["brownout:", "brownout:soft"]);
        assert_eq!(
            ingestor.ingest(&event),
            IngestOutcome::Ignored(IgnoreReason::NoDirective)
        );
    }

    #[test]
    fn test_invalid_mode_is_ignored_with_value_in_reason() {
        let (ingestor, controller) = ingestor();
        controller.set_mode(BrownoutMode::Soft, TransitionSource::Manual, None);
        let event = AlertEvent::triggered(["brownout:ludicrous"]);
        let outcome = ingestor.ingest(&event);
        match outcome {
            IngestOutcome::Ignored(reason) => {
                assert_eq!(reason.to_string(), "invalid mode ludicrous");
            }
            other => panic!("expected Ignored, got {other:?}"),
        }
        assert_eq!(controller.mode(), BrownoutMode::Soft);
    }

    #[test]
    fn test_mismatched_case_directive_is_invalid() {
        let (ingestor, _) = ingestor();
        let outcome = ingestor.ingest(&AlertEvent::triggered(["brownout:Hard"]));
        assert_eq!(
            outcome,
            IngestOutcome::Ignored(IgnoreReason::InvalidMode("Hard".to_string()))
        );
    }

    #[test]
    fn test_directive_value_stops_at_next_colon() {
        let event = AlertEvent::triggered(["brownout:emergency:eu-west"]);
        assert_eq!(event.directive(), Some("emergency"));
    }

    #[test]
    fn test_applied_transition_is_tagged_external_alert() {
        let (ingestor, controller) = ingestor();
        let mut event = AlertEvent::triggered(["brownout:soft"]);
        event.title = Some("p95 latency high".to_string());
        ingestor.ingest(&event);
        let history = controller.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, TransitionSource::ExternalAlert);
        assert_eq!(history[0].reason.as_deref(), Some("p95 latency high"));
    }

    #[test]
    fn test_payload_keeps_unknown_fields() {
        let raw = r#"{
            "alert_id": "123",
            "alert_transition": "Triggered",
            "tags": ["brownout:hard"],
            "title": "High latency",
            "org_id": "42",
            "priority": "normal"
        }"#;
        let event: AlertEvent = serde_json::from_str(raw).expect("test: de");
        assert_eq!(event.alert_id.as_deref(), Some("123"));
        assert_eq!(event.tags, vec!["brownout:hard"]);
        assert_eq!(event.extra.get("org_id"), Some(&serde_json::json!("42")));
        assert_eq!(event.extra.len(), 2);
    }

    #[test]
    fn test_null_tags_deserialize_as_empty() {
        let event: AlertEvent =
            serde_json::from_str(r#"{"alert_transition": "Triggered", "tags": null}"#)
                .expect("test: de");
        assert!(event.tags.is_empty());
    }

    #[test]
    fn test_minimal_payload_deserializes() {
        let event: AlertEvent = serde_json::from_str("{}").expect("test: de");
        assert!(event.tags.is_empty());
        assert!(event.alert_transition.is_none());
    }
}
