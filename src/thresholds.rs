//! Per-mode trigger thresholds.
//!
//! ## Responsibility
//! Hold the advisory latency/error-rate/cost values associated with each
//! degraded mode and merge partial updates into them.
//!
//! ## Guarantees
//! - `Normal` never carries an entry
//! - Updates are upsert-merges: modes absent from an update keep their values
//! - An update naming an unknown mode is rejected whole, nothing is applied
//!
//! ## NOT Responsible For
//! - Locking (that belongs to `controller`)
//! - Comparing live telemetry against thresholds (that belongs to `health`)

use std::collections::{BTreeMap, HashMap};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::mode::BrownoutMode;

/// Trigger values for a single degraded mode.
///
/// Ranges are advisory only. Out-of-range values are stored as given.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModeThresholds {
    /// 95th percentile latency in milliseconds.
    #[serde(rename = "latency_p95")]
    pub latency_p95_ms: f64,
    /// Error rate as a fraction in `[0, 1]`.
    pub error_rate: f64,
    /// Spend ceiling in currency units per hour.
    #[serde(rename = "cost")]
    pub cost_ceiling: f64,
}

impl ModeThresholds {
    /// Build a threshold record.
    pub const fn new(latency_p95_ms: f64, error_rate: f64, cost_ceiling: f64) -> Self {
        Self {
            latency_p95_ms,
            error_rate,
            cost_ceiling,
        }
    }
}

/// A partial update keyed by raw mode label, as received from the outside.
pub type ThresholdUpdate = HashMap<String, ModeThresholds>;

/// A threshold update that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThresholdError {
    /// The key does not name a mode at all.
    #[error("unknown mode '{0}' in threshold update")]
    UnknownMode(String),
    /// The key names `normal`, which has no trigger.
    #[error("mode 'normal' does not take thresholds")]
    NormalHasNoThresholds,
}

/// Mapping from degraded mode to its thresholds.
///
/// Serializes as a JSON object keyed by lowercase mode name.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ThresholdSet {
    entries: BTreeMap<BrownoutMode, ModeThresholds>,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(BrownoutMode::Soft, ModeThresholds::new(2000.0, 0.05, 50.0));
        entries.insert(BrownoutMode::Hard, ModeThresholds::new(5000.0, 0.10, 100.0));
        entries.insert(
            BrownoutMode::Emergency,
            ModeThresholds::new(10000.0, 0.20, 200.0),
        );
        Self { entries }
    }
}

impl ThresholdSet {
    /// A set with no entries at all.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Thresholds for `mode`, if any are stored.
    pub fn get(&self, mode: BrownoutMode) -> Option<&ModeThresholds> {
        self.entries.get(&mode)
    }

    /// Iterate over `(mode, thresholds)` in ascending severity.
    pub fn iter(&self) -> impl Iterator<Item = (BrownoutMode, &ModeThresholds)> {
        self.entries.iter().map(|(m, t)| (*m, t))
    }

    /// Number of modes with stored thresholds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no thresholds are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Upsert a single mode's thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ThresholdError::NormalHasNoThresholds`] for `Normal`.
    pub fn insert(
        &mut self,
        mode: BrownoutMode,
        thresholds: ModeThresholds,
    ) -> Result<(), ThresholdError> {
        if !mode.has_thresholds() {
            return Err(ThresholdError::NormalHasNoThresholds);
        }
        self.entries.insert(mode, thresholds);
        Ok(())
    }

    /// Merge a raw-keyed update into this set.
    ///
    /// Every key is parsed before anything is written, so a bad key leaves
    /// the set untouched.
    ///
    /// # Errors
    ///
    /// Returns the first [`ThresholdError`] found among the keys.
    pub fn merge(&mut self, update: &ThresholdUpdate) -> Result<(), ThresholdError> {
        let parsed = parse_update(update)?;
        self.entries.extend(parsed);
        Ok(())
    }
}

/// Deserialize a partial threshold table on top of [`ThresholdSet::default`].
///
/// Modes the table leaves out keep their default values. Entries are stored
/// as written, `normal` included, so config validation can report it.
///
/// # Errors
///
/// Returns the deserializer's error if the table is not a map of mode to
/// thresholds.
pub fn deserialize_over_defaults<'de, D>(deserializer: D) -> Result<ThresholdSet, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let configured = BTreeMap::<BrownoutMode, ModeThresholds>::deserialize(deserializer)?;
    let mut set = ThresholdSet::default();
    set.entries.extend(configured);
    Ok(set)
}

fn parse_update(
    update: &ThresholdUpdate,
) -> Result<Vec<(BrownoutMode, ModeThresholds)>, ThresholdError> {
    // Sorted so the reported error is deterministic across HashMap orders.
    let mut keys: Vec<&String> = update.keys().collect();
    keys.sort();

    let mut parsed = Vec::with_capacity(update.len());
    for key in keys {
        let mode: BrownoutMode = key
            .parse()
            .map_err(|_| ThresholdError::UnknownMode(key.clone()))?;
        if !mode.has_thresholds() {
            return Err(ThresholdError::NormalHasNoThresholds);
        }
        if let Some(t) = update.get(key) {
            parsed.push((mode, *t));
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(pairs: &[(&str, ModeThresholds)]) -> ThresholdUpdate {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_default_set_has_three_degraded_modes() {
        let set = ThresholdSet::default();
        assert_eq!(set.len(), 3);
        assert!(set.get(BrownoutMode::Normal).is_none());
        assert_eq!(
            set.get(BrownoutMode::Hard),
            Some(&ModeThresholds::new(5000.0, 0.10, 100.0))
        );
    }

    #[test]
    fn test_merge_hard_only_leaves_other_modes_untouched() {
        let mut set = ThresholdSet::default();
        let before = set.clone();
        let new_hard = ModeThresholds::new(4000.0, 0.08, 90.0);
        set.merge(&update(&[("hard", new_hard)]))
            .expect("test: merge succeeds");

        assert_eq!(set.len(), 3);
        assert_eq!(set.get(BrownoutMode::Hard), Some(&new_hard));
        assert_eq!(
            set.get(BrownoutMode::Soft),
            before.get(BrownoutMode::Soft)
        );
        assert_eq!(
            set.get(BrownoutMode::Emergency),
            before.get(BrownoutMode::Emergency)
        );
    }

    #[test]
    fn test_merge_with_unknown_key_applies_nothing() {
        let mut set = ThresholdSet::default();
        let before = set.clone();
        let result = set.merge(&update(&[
            ("soft", ModeThresholds::new(1.0, 0.0, 1.0)),
            ("turbo", ModeThresholds::new(1.0, 0.0, 1.0)),
        ]));
        assert_eq!(
            result,
            Err(ThresholdError::UnknownMode("turbo".to_string()))
        );
        assert_eq!(set, before);
    }

    #[test]
    fn test_merge_rejects_normal_key() {
        let mut set = ThresholdSet::default();
        let result = set.merge(&update(&[("normal", ModeThresholds::new(1.0, 0.0, 1.0))]));
        assert_eq!(result, Err(ThresholdError::NormalHasNoThresholds));
    }

    #[test]
    fn test_merge_accepts_out_of_range_values() {
        let mut set = ThresholdSet::default();
        let odd = ModeThresholds::new(-5.0, 3.5, -1.0);
        set.merge(&update(&[("emergency", odd)]))
            .expect("test: ranges are advisory");
        assert_eq!(set.get(BrownoutMode::Emergency), Some(&odd));
    }

    #[test]
    fn test_serializes_as_object_keyed_by_mode_name() {
        let json = serde_json::to_value(ThresholdSet::default()).expect("test: ser");
        assert_eq!(json["soft"]["latency_p95"], 2000.0);
        assert_eq!(json["hard"]["error_rate"], 0.10);
        assert_eq!(json["emergency"]["cost"], 200.0);
        assert!(json.get("normal").is_none());
    }

    #[test]
    fn test_update_deserializes_from_wire_shape() {
        let raw = r#"{"soft": {"latency_p95": 1500, "error_rate": 0.02, "cost": 40}}"#;
        let parsed: ThresholdUpdate = serde_json::from_str(raw).expect("test: de");
        assert_eq!(
            parsed.get("soft"),
            Some(&ModeThresholds::new(1500.0, 0.02, 40.0))
        );
    }
}
