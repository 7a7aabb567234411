//! Integration tests for the mode controller under concurrent access, and
//! for the alert and health paths that drive it.

use std::sync::Arc;
use std::thread;

use open_balancer::health::ClosedLoopConfig;
use open_balancer::metrics::PrometheusTelemetry;
use open_balancer::{
    AlertEvent, AlertIngestor, BrownoutMode, HealthMonitor, HealthSample, IgnoreReason,
    IngestOutcome, ModeController, ModeThresholds, TelemetrySink, ThresholdSet, ThresholdUpdate,
    TransitionSource,
};

fn update(mode: &str, latency: f64) -> ThresholdUpdate {
    let mut u = ThresholdUpdate::new();
    u.insert(mode.to_string(), ModeThresholds::new(latency, 0.5, latency));
    u
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_set_and_get_only_observe_valid_modes() {
    let controller = Arc::new(ModeController::new());
    let mut handles = Vec::new();

    for t in 0..4 {
        let c = controller.clone();
        handles.push(thread::spawn(move || {
            for i in 0..500 {
                let mode = BrownoutMode::ALL[(i + t) % 4];
                c.set_mode(mode, TransitionSource::Manual, None);
            }
        }));
    }
    for _ in 0..4 {
        let c = controller.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..500 {
                assert!(BrownoutMode::ALL.contains(&c.mode()));
            }
        }));
    }
    for h in handles {
        h.join().expect("test: thread joined");
    }
}

#[test]
fn test_concurrent_merges_never_expose_torn_records() {
    // Every writer stores latency == cost for one mode; a reader that sees
    // them differ has observed a half-applied record.
    let controller = Arc::new(ModeController::new());
    let mut handles = Vec::new();

    for t in 0..4u32 {
        let c = controller.clone();
        handles.push(thread::spawn(move || {
            for i in 0..300u32 {
                let value = f64::from(t * 1000 + i);
                c.update_thresholds(&update("hard", value))
                    .expect("test: valid update");
            }
        }));
    }
    for _ in 0..4 {
        let c = controller.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..300 {
                let set = c.thresholds();
                let hard = set.get(BrownoutMode::Hard).expect("test: hard present");
                assert!((hard.latency_p95_ms - hard.cost_ceiling).abs() < f64::EPSILON);
                assert!(set.get(BrownoutMode::Normal).is_none());
            }
        }));
    }
    for h in handles {
        h.join().expect("test: thread joined");
    }
}

#[test]
fn test_last_event_and_gauge_match_final_mode_under_contention() {
    let telemetry = Arc::new(PrometheusTelemetry::new().expect("test: metrics"));
    let sink: Arc<dyn TelemetrySink> = telemetry.clone();
    let controller = Arc::new(ModeController::with_telemetry(sink));

    for round in 0..50 {
        let mut rx = controller.subscribe();
        let mut handles = Vec::new();
        for t in 0..4usize {
            let c = controller.clone();
            handles.push(thread::spawn(move || {
                for i in 0..10 {
                    c.set_mode(
                        BrownoutMode::ALL[(i + t + round) % 4],
                        TransitionSource::Manual,
                        None,
                    );
                }
            }));
        }
        for h in handles {
            h.join().expect("test: thread joined");
        }

        let mut last = None;
        loop {
            match rx.try_recv() {
                Ok(event) => last = Some(event),
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        let final_mode = controller.mode();
        if let Some(event) = last {
            assert_eq!(event.to, final_mode, "round {round}");
        }

        let families = telemetry.gather();
        let gauge = families
            .iter()
            .find(|f| f.get_name() == "balancer_current_mode")
            .expect("test: gauge registered");
        assert_eq!(
            gauge.get_metric()[0].get_gauge().get_value() as u8,
            final_mode.severity(),
            "round {round}"
        );
    }
}

#[test]
fn test_history_length_matches_number_of_set_calls_under_capacity() {
    let controller = Arc::new(ModeController::new());
    let mut handles = Vec::new();
    for _ in 0..4 {
        let c = controller.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..25 {
                c.set_mode(BrownoutMode::Soft, TransitionSource::Manual, None);
            }
        }));
    }
    for h in handles {
        h.join().expect("test: thread joined");
    }
    assert_eq!(controller.history().len(), 100);
}

// ============================================================================
// Alert path
// ============================================================================

#[test]
fn test_alert_sequence_drives_controller_and_metrics() {
    let telemetry = Arc::new(PrometheusTelemetry::new().expect("test: metrics"));
    let sink: Arc<dyn TelemetrySink> = telemetry.clone();
    let controller = Arc::new(ModeController::with_telemetry(sink));
    let ingestor = AlertIngestor::new(controller.clone());

    let outcome = ingestor.ingest(&AlertEvent::triggered(["team:llm", "brownout:soft"]));
    assert_eq!(outcome, IngestOutcome::Applied(BrownoutMode::Soft));

    let outcome = ingestor.ingest(&AlertEvent::triggered(["brownout:Emergency"]));
    assert_eq!(
        outcome,
        IngestOutcome::Ignored(IgnoreReason::InvalidMode("Emergency".to_string()))
    );
    assert_eq!(controller.mode(), BrownoutMode::Soft);

    let outcome = ingestor.ingest(&AlertEvent::triggered(["brownout:emergency"]));
    assert_eq!(outcome, IngestOutcome::Applied(BrownoutMode::Emergency));

    let counts = telemetry.mode_activation_counts();
    assert_eq!(counts.get("soft:external-alert"), Some(&1));
    assert_eq!(counts.get("emergency:external-alert"), Some(&1));
}

#[test]
fn test_recovered_alert_never_touches_controller() {
    let controller = Arc::new(ModeController::new());
    let ingestor = AlertIngestor::new(controller.clone());
    let event = AlertEvent {
        alert_transition: Some("Recovered".to_string()),
        tags: vec!["brownout:hard".to_string()],
        ..AlertEvent::default()
    };
    assert_eq!(
        ingestor.ingest(&event),
        IngestOutcome::Ignored(IgnoreReason::NotTriggered)
    );
    assert!(controller.history().is_empty());
}

// ============================================================================
// Health path
// ============================================================================

#[test]
fn test_health_loop_follows_runtime_threshold_updates() {
    let controller = Arc::new(ModeController::with_state(
        ThresholdSet::default(),
        Arc::new(open_balancer::NoopTelemetry),
    ));
    let monitor = HealthMonitor::new(
        controller.clone(),
        ClosedLoopConfig {
            enabled: true,
            window_size: 1,
            consecutive_readings: 1,
        },
    );
    let sample = HealthSample {
        latency_p95_ms: 1500.0,
        error_rate: 0.0,
        cost_per_hour: 0.0,
    };

    assert_eq!(monitor.observe(sample).current_mode, BrownoutMode::Normal);

    controller
        .update_thresholds(&update("soft", 1000.0))
        .expect("test: valid update");
    let verdict = monitor.observe(sample);
    assert!(verdict.applied);
    assert_eq!(controller.mode(), BrownoutMode::Soft);
}
