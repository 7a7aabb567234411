//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`BalancerConfig`] that cannot
//! be expressed through the type system alone (range checks, cross-field
//! invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::BalancerConfig;
use crate::mode::BrownoutMode;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "closed_loop.window_size").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Validate all semantic constraints on a [`BalancerConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &BalancerConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Server ───────────────────────────────────────────────────────
    if config.server.port == 0 {
        errors.push(ConfigError::InvalidField {
            field: "server.port".into(),
            value: "0".into(),
            reason: "must be a fixed port, not 0".into(),
        });
    }

    if config.server.max_request_size == 0 {
        errors.push(ConfigError::InvalidField {
            field: "server.max_request_size".into(),
            value: "0".into(),
            reason: "must be at least 1 byte".into(),
        });
    }

    for origin in &config.server.allowed_origins {
        if origin.trim().is_empty() || origin.chars().any(char::is_whitespace) {
            errors.push(ConfigError::InvalidField {
                field: "server.allowed_origins".into(),
                value: format!("\"{origin}\""),
                reason: "origins must be non-empty and contain no whitespace".into(),
            });
        }
    }

    // ── LLM provider ─────────────────────────────────────────────────
    if config.llm.model.trim().is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "llm.model".into(),
            value: format!("\"{}\"", config.llm.model),
            reason: "must not be empty".into(),
        });
    }

    if !(config.llm.unit_price_per_million >= 0.0) {
        errors.push(ConfigError::InvalidField {
            field: "llm.unit_price_per_million".into(),
            value: config.llm.unit_price_per_million.to_string(),
            reason: "must be a non-negative number".into(),
        });
    }

    if config.llm.request_timeout_ms == 0 {
        errors.push(ConfigError::InvalidField {
            field: "llm.request_timeout_ms".into(),
            value: "0".into(),
            reason: "must be at least 1ms".into(),
        });
    }

    // ── Thresholds ───────────────────────────────────────────────────
    if config.thresholds.get(BrownoutMode::Normal).is_some() {
        errors.push(ConfigError::InvalidField {
            field: "thresholds.normal".into(),
            value: "<table>".into(),
            reason: "normal mode does not take thresholds".into(),
        });
    }

    // ── Closed loop ──────────────────────────────────────────────────
    let window = config.closed_loop.window_size;
    let readings = config.closed_loop.consecutive_readings;

    if window == 0 {
        errors.push(ConfigError::InvalidField {
            field: "closed_loop.window_size".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if readings == 0 {
        errors.push(ConfigError::InvalidField {
            field: "closed_loop.consecutive_readings".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    } else if window > 0 && readings > window {
        errors.push(ConfigError::InvalidField {
            field: "closed_loop.consecutive_readings".into(),
            value: readings.to_string(),
            reason: format!("must be \u{2264} closed_loop.window_size ({window})"),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::ModeThresholds;

    fn field_errors(config: &BalancerConfig) -> Vec<String> {
        match validate(config) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .into_iter()
                .filter_map(|e| match e {
                    ConfigError::InvalidField { field, .. } => Some(field),
                    _ => None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&BalancerConfig::default()).is_ok());
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut config = BalancerConfig::default();
        config.server.port = 0;
        assert_eq!(field_errors(&config), vec!["server.port"]);
    }

    #[test]
    fn test_zero_body_limit_rejected() {
        let mut config = BalancerConfig::default();
        config.server.max_request_size = 0;
        assert_eq!(field_errors(&config), vec!["server.max_request_size"]);
    }

    #[test]
    fn test_blank_model_rejected() {
        let mut config = BalancerConfig::default();
        config.llm.model = "   ".into();
        assert_eq!(field_errors(&config), vec!["llm.model"]);
    }

    #[test]
    fn test_negative_unit_price_rejected() {
        let mut config = BalancerConfig::default();
        config.llm.unit_price_per_million = -0.5;
        assert_eq!(field_errors(&config), vec!["llm.unit_price_per_million"]);
    }

    #[test]
    fn test_nan_unit_price_rejected() {
        let mut config = BalancerConfig::default();
        config.llm.unit_price_per_million = f64::NAN;
        assert_eq!(field_errors(&config), vec!["llm.unit_price_per_million"]);
    }

    #[test]
    fn test_zero_unit_price_allowed() {
        let mut config = BalancerConfig::default();
        config.llm.unit_price_per_million = 0.0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = BalancerConfig::default();
        config.llm.request_timeout_ms = 0;
        assert_eq!(field_errors(&config), vec!["llm.request_timeout_ms"]);
    }

    #[test]
    fn test_blank_origin_rejected() {
        let mut config = BalancerConfig::default();
        config.server.allowed_origins.push(" ".into());
        assert_eq!(field_errors(&config), vec!["server.allowed_origins"]);
    }

    #[test]
    fn test_normal_threshold_entry_rejected() {
        let toml_str = r#"
[thresholds.normal]
latency_p95 = 1
error_rate = 0.0
cost = 1
"#;
        let config: BalancerConfig = toml::from_str(toml_str).expect("test: parse");
        assert_eq!(field_errors(&config), vec!["thresholds.normal"]);
    }

    #[test]
    fn test_custom_thresholds_accepted() {
        let mut config = BalancerConfig::default();
        config
            .thresholds
            .insert(BrownoutMode::Soft, ModeThresholds::new(10.0, 0.5, 1.0))
            .expect("test: insert");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = BalancerConfig::default();
        config.closed_loop.window_size = 0;
        assert_eq!(field_errors(&config), vec!["closed_loop.window_size"]);
    }

    #[test]
    fn test_zero_consecutive_readings_rejected() {
        let mut config = BalancerConfig::default();
        config.closed_loop.consecutive_readings = 0;
        assert_eq!(field_errors(&config), vec!["closed_loop.consecutive_readings"]);
    }

    #[test]
    fn test_readings_larger_than_window_rejected() {
        let mut config = BalancerConfig::default();
        config.closed_loop.window_size = 2;
        config.closed_loop.consecutive_readings = 5;
        assert_eq!(field_errors(&config), vec!["closed_loop.consecutive_readings"]);
    }

    #[test]
    fn test_all_errors_collected() {
        let mut config = BalancerConfig::default();
        config.server.port = 0;
        config.llm.model = String::new();
        config.llm.request_timeout_ms = 0;
        let fields = field_errors(&config);
        assert_eq!(fields.len(), 3, "got {fields:?}");
    }

    #[test]
    fn test_invalid_field_display_names_field_and_reason() {
        let err = ConfigError::InvalidField {
            field: "server.port".into(),
            value: "0".into(),
            reason: "must be a fixed port, not 0".into(),
        };
        let shown = err.to_string();
        assert!(shown.contains("server.port"));
        assert!(shown.contains("must be a fixed port"));
    }
}
