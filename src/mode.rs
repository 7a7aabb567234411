//! Brownout modes.
//!
//! A [`BrownoutMode`] is the single discrete service-quality level active in
//! the process. Modes are totally ordered by severity:
//!
//! ```text
//! Normal < Soft < Hard < Emergency
//! ```
//!
//! The wire form is the lowercase name. Parsing is exact: `"Hard"` and
//! `" hard"` are rejected just like `"ludicrous"`.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Discrete degradation level controlling how much quality/cost each request
/// is allowed to spend.
///
/// # Panics
///
/// This type never panics.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum BrownoutMode {
    /// Full quality, no degradation.
    #[default]
    Normal,
    /// Mild degradation: concise answers.
    Soft,
    /// Heavy degradation: brief, focused answers.
    Hard,
    /// Minimal answers only.
    Emergency,
}

impl BrownoutMode {
    /// Every mode, in ascending severity.
    pub const ALL: [BrownoutMode; 4] = [
        BrownoutMode::Normal,
        BrownoutMode::Soft,
        BrownoutMode::Hard,
        BrownoutMode::Emergency,
    ];

    /// Modes that carry trigger thresholds. `Normal` has none.
    pub const TRIGGERED: [BrownoutMode; 3] = [
        BrownoutMode::Soft,
        BrownoutMode::Hard,
        BrownoutMode::Emergency,
    ];

    /// Lowercase wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            BrownoutMode::Normal => "normal",
            BrownoutMode::Soft => "soft",
            BrownoutMode::Hard => "hard",
            BrownoutMode::Emergency => "emergency",
        }
    }

    /// Numeric severity, `0` for `Normal` up to `3` for `Emergency`.
    pub const fn severity(self) -> u8 {
        match self {
            BrownoutMode::Normal => 0,
            BrownoutMode::Soft => 1,
            BrownoutMode::Hard => 2,
            BrownoutMode::Emergency => 3,
        }
    }

    /// Whether this mode carries trigger thresholds.
    pub const fn has_thresholds(self) -> bool {
        !matches!(self, BrownoutMode::Normal)
    }
}

impl fmt::Display for BrownoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label that does not name a [`BrownoutMode`].
///
/// Carries the rejected input so callers can report it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid mode {0}")]
pub struct ParseModeError(pub String);

impl ParseModeError {
    /// The label that failed to parse.
    pub fn label(&self) -> &str {
        &self.0
    }
}

impl FromStr for BrownoutMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(BrownoutMode::Normal),
            "soft" => Ok(BrownoutMode::Soft),
            "hard" => Ok(BrownoutMode::Hard),
            "emergency" => Ok(BrownoutMode::Emergency),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}
