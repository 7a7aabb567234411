//! Mode → generation policy.
//!
//! Pure functions, no I/O and no state. The policy is recomputed on every
//! request so a mode change is visible to the very next request.
//!
//! | Mode | temperature | max output tokens | tone |
//! |------|-------------|-------------------|------|
//! | normal | 0.7 | 1000 | comprehensive |
//! | soft | 0.5 | 500 | concise |
//! | hard | 0.3 | 200 | brief |
//! | emergency | 0.1 | 50 | essential only |

use serde::{Deserialize, Serialize};

use crate::mode::BrownoutMode;

const PREAMBLE_NORMAL: &str = "You are an AI assistant for open-Balancer, helping users with LLM \
adaptive control and brownout strategies. Provide comprehensive, detailed responses.";
const PREAMBLE_SOFT: &str =
    "You are an AI assistant for open-Balancer. Provide helpful but concise responses.";
const PREAMBLE_HARD: &str =
    "You are an AI assistant for open-Balancer. Provide brief, focused responses.";
const PREAMBLE_EMERGENCY: &str =
    "You are an AI assistant for open-Balancer. Provide very brief, essential responses only.";

/// Generation parameters derived from the active mode.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPolicy {
    /// Instruction placed first in every prompt.
    pub system_preamble: String,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
}

/// The generation policy for `mode`.
///
/// # Panics
///
/// This function never panics.
pub fn resolve(mode: BrownoutMode) -> GenerationPolicy {
    let (preamble, temperature, max_output_tokens) = match mode {
        BrownoutMode::Normal => (PREAMBLE_NORMAL, 0.7, 1000),
        BrownoutMode::Soft => (PREAMBLE_SOFT, 0.5, 500),
        BrownoutMode::Hard => (PREAMBLE_HARD, 0.3, 200),
        BrownoutMode::Emergency => (PREAMBLE_EMERGENCY, 0.1, 50),
    };
    GenerationPolicy {
        system_preamble: preamble.to_string(),
        temperature,
        max_output_tokens,
    }
}

/// Resolve a raw mode label, falling back to the `Normal` policy for
/// anything that is not a mode name.
///
/// # Panics
///
/// This function never panics.
pub fn resolve_label(label: &str) -> GenerationPolicy {
    resolve(label.parse().unwrap_or_default())
}

/// Extra steering for requests coming from a known console area.
pub fn context_focus(hint: &str) -> Option<&'static str> {
    match hint {
        "dashboard" => Some(
            "Focus on helping users understand their system metrics, brownout status, and performance data.",
        ),
        "incidents" => Some(
            "Focus on incident analysis and how brownout strategies help mitigate system issues.",
        ),
        "brownout" => Some("Focus on brownout modes, thresholds, and adaptive control strategies."),
        "observability" => {
            Some("Focus on monitoring data, traces, logs, and system health metrics.")
        }
        "help" => Some("Focus on setup, configuration, troubleshooting, and best practices."),
        "chat" => Some("Focus on helping users test LLM queries and understand brownout behavior."),
        "settings" => Some("Focus on configuration, integrations, and account settings."),
        _ => None,
    }
}

/// Build the outbound prompt: preamble, then context hint, then the user
/// message, newline-separated in that order.
///
/// # Example
///
/// ```rust
/// use open_balancer::policy::{assemble_prompt, resolve};
/// use open_balancer::BrownoutMode;
///
/// let prompt = assemble_prompt(&resolve(BrownoutMode::Hard), "general", "hi");
/// assert!(prompt.ends_with("User: hi"));
/// ```
pub fn assemble_prompt(policy: &GenerationPolicy, context_hint: &str, message: &str) -> String {
    let context_line = match context_focus(context_hint) {
        Some(focus) => format!("Context: {context_hint}. {focus}"),
        None => format!("Context: {context_hint}."),
    };
    format!(
        "{}\n{}\n\nUser: {}",
        policy.system_preamble, context_line, message
    )
}
