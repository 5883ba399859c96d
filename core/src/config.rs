//! Service configuration.
//!
//! Loaded from TOML with every section optional, then overridden from the
//! environment:
//!
//! ```toml
//! [database]
//! path = "qc.sqlite3"
//!
//! [evaluation]
//! timeout_ms = 100
//!
//! [logging]
//! filter = "qc_calibration=info"
//! json = false
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DATABASE_PATH_ENV: &str = "QC_DATABASE_PATH";
pub const EVAL_TIMEOUT_ENV: &str = "QC_EVAL_TIMEOUT_MS";
pub const LOG_JSON_ENV: &str = "QC_LOG_JSON";

/// Longest formula budget accepted.
pub const MAX_EVAL_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub database: DatabaseConfig,
    pub evaluation: EvaluationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "qc_calibration.sqlite3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Wall-clock budget per formula evaluation.
    pub timeout_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { timeout_ms: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `QC_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "qc_calibration=info".to_string(),
            json: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DATABASE_PATH_ENV) {
            self.database.path = path;
        }
        if let Some(raw) = lookup(EVAL_TIMEOUT_ENV) {
            self.evaluation.timeout_ms =
                raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::Invalid {
                        key: EVAL_TIMEOUT_ENV,
                        reason: e.to_string(),
                    }
                })?;
        }
        if let Some(raw) = lookup(LOG_JSON_ENV) {
            self.logging.json = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(ConfigError::Invalid {
                        key: LOG_JSON_ENV,
                        reason: format!("expected a boolean, got {other:?}"),
                    })
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "database.path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.evaluation.timeout_ms == 0 || self.evaluation.timeout_ms > MAX_EVAL_TIMEOUT_MS {
            return Err(ConfigError::Invalid {
                key: "evaluation.timeout_ms",
                reason: format!("must be between 1 and {MAX_EVAL_TIMEOUT_MS}"),
            });
        }
        Ok(())
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation.timeout_ms)
    }
}
