//! Runner configuration
//!
//! Values are layered: defaults, then an optional config file, then
//! `FANOUT_*` environment variables. Front ends apply their own flags last.

use crate::error::{FanoutError, FanoutResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable overriding [`RunnerConfig::limit`]
pub const ENV_LIMIT: &str = "FANOUT_LIMIT";
/// Environment variable overriding [`RunnerConfig::cancel_on_failure`]
pub const ENV_CANCEL_ON_FAILURE: &str = "FANOUT_CANCEL_ON_FAILURE";

/// Configuration for a [`Runner`](crate::runner::Runner)
///
/// # Examples
///
/// ```rust
/// use fanout_core::RunnerConfig;
///
/// let config = RunnerConfig::default()
///     .with_limit(8)
///     .with_cancel_on_failure(true);
/// assert_eq!(config.limit, 8);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of tasks executing at once (0 = unlimited)
    #[serde(default)]
    pub limit: usize,

    /// Cancel the runner's signal when the first task fails, so tasks that
    /// have not started yet are skipped
    #[serde(default)]
    pub cancel_on_failure: bool,
}

impl RunnerConfig {
    /// Set the concurrency limit (0 = unlimited)
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Enable or disable cancel-on-failure
    pub fn with_cancel_on_failure(mut self, enabled: bool) -> Self {
        self.cancel_on_failure = enabled;
        self
    }

    /// Load configuration from a file
    ///
    /// Supports JSON, TOML, and YAML formats based on file extension.
    /// Returns the default config if the file doesn't exist; a file that
    /// exists but cannot be read is an [`FanoutError::Io`] error.
    pub fn load_from_file(path: &Path) -> FanoutResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| {
                FanoutError::config(format!(
                    "Failed to parse TOML config '{}': {}",
                    path.display(),
                    e
                ))
            })?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
                FanoutError::config(format!(
                    "Failed to parse YAML config '{}': {}",
                    path.display(),
                    e
                ))
            })?,
            _ => serde_json::from_str(&content).map_err(|e| {
                FanoutError::config(format!(
                    "Failed to parse JSON config '{}': {}",
                    path.display(),
                    e
                ))
            })?,
        };

        tracing::debug!(path = %path.display(), ?config, "loaded runner config");
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(self) -> FanoutResult<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_env_from<F>(mut self, lookup: F) -> FanoutResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_LIMIT) {
            self.limit = value.trim().parse().map_err(|_| {
                FanoutError::config(format!("Invalid {} value: {:?}", ENV_LIMIT, value))
            })?;
        }

        if let Some(value) = lookup(ENV_CANCEL_ON_FAILURE) {
            self.cancel_on_failure = parse_bool(&value).ok_or_else(|| {
                FanoutError::config(format!(
                    "Invalid {} value: {:?}",
                    ENV_CANCEL_ON_FAILURE, value
                ))
            })?;
        }

        Ok(self)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
