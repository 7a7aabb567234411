//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`BalancerConfig`], layer
//! environment overrides on top, and run validation before returning. This
//! is the primary entry point for loading configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//! - Environment values win over file values
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::{BalancerConfig, LogFormat};

/// Environment variables read by [`apply_env_overrides`].
pub const ENV_VARS: [&str; 6] = [
    "GEMINI_API_KEY",
    "GOOGLE_CLOUD_PROJECT",
    "GOOGLE_CLOUD_LOCATION",
    "GOOGLE_CLOUD_ACCESS_TOKEN",
    "BALANCER_PORT",
    "LOG_FORMAT",
];

/// Load a [`BalancerConfig`] from a TOML file.
///
/// Reads the file, parses it as TOML, and validates all semantic constraints.
/// Environment overrides are not applied; see [`load`].
///
/// # Returns
///
/// - `Ok(BalancerConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust,ignore
/// use open_balancer::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("balancer.toml"))?;
/// println!("Listening on port {}", config.server.port);
/// ```
pub fn load_from_file(path: &Path) -> Result<BalancerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`BalancerConfig`] from a TOML string.
///
/// Useful for testing or embedding configs without file I/O.
///
/// # Arguments
///
/// * `content` — TOML content as a string.
/// * `source_name` — Identifier for the source (used in error messages).
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<BalancerConfig, ConfigError> {
    let config = parse(content, source_name)?;
    check(&config)?;
    Ok(config)
}

/// Startup loader: file (or defaults), then environment, then validation.
///
/// # Errors
///
/// Any [`ConfigError`] from reading, parsing, overriding, or validating.
///
/// # Panics
///
/// This function never panics.
pub fn load(path: Option<&Path>) -> Result<BalancerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                file: path.display().to_string(),
                source: e,
            })?;
            parse(&content, &path.display().to_string())?
        }
        None => BalancerConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    check(&config)?;
    Ok(config)
}

/// Overlay values from the process environment.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when `BALANCER_PORT` or
/// `LOG_FORMAT` cannot be parsed.
pub fn apply_env_overrides(config: &mut BalancerConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |name| std::env::var(name).ok())
}

/// Overlay values from an arbitrary lookup. Empty values are ignored.
///
/// # Errors
///
/// Same as [`apply_env_overrides`].
pub fn apply_overrides_from<F>(config: &mut BalancerConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(key) = get("GEMINI_API_KEY") {
        config.llm.api_key = Some(key);
    }
    if let Some(project) = get("GOOGLE_CLOUD_PROJECT") {
        config.llm.vertex_project = Some(project);
    }
    if let Some(location) = get("GOOGLE_CLOUD_LOCATION") {
        config.llm.vertex_location = location;
    }
    if let Some(token) = get("GOOGLE_CLOUD_ACCESS_TOKEN") {
        config.llm.vertex_access_token = Some(token);
    }
    if let Some(port) = get("BALANCER_PORT") {
        config.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidField {
            field: "BALANCER_PORT".into(),
            value: port.clone(),
            reason: "must be an integer in 1..=65535".into(),
        })?;
    }
    if let Some(format) = get("LOG_FORMAT") {
        config.observability.log_format = match format.trim() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => {
                return Err(ConfigError::InvalidField {
                    field: "LOG_FORMAT".into(),
                    value: format,
                    reason: "must be \"json\" or \"pretty\"".into(),
                })
            }
        };
    }
    Ok(())
}

fn parse(content: &str, source_name: &str) -> Result<BalancerConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })
}

fn check(config: &BalancerConfig) -> Result<(), ConfigError> {
    validation::validate(config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })
}
