//! Configuration file loading
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError};

/// Prefix for environment overrides, e.g. `CODEJUDGE_POOL__QUEUE_LENGTH=8`
const ENV_PREFIX: &str = "CODEJUDGE";

impl Config {
    /// Load configuration from a file, with `CODEJUDGE_*` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (id, lang) in self.languages.iter_sorted() {
            if lang.name.is_empty() {
                return Err(invalid(format!("language '{id}' has empty name")));
            }
            if lang.extension.is_empty() {
                return Err(invalid(format!("language '{id}' has empty extension")));
            }
            if lang.run.command.is_empty() {
                return Err(invalid(format!("language '{id}' has empty run command")));
            }
            if !is_positive(lang.time_multiplier) || !is_positive(lang.memory_multiplier) {
                return Err(invalid(format!(
                    "language '{id}' multipliers must be positive"
                )));
            }
            if let Some(ref compile) = lang.compile {
                if compile.command.is_empty() {
                    return Err(invalid(format!(
                        "language '{id}' has empty compile command"
                    )));
                }
                if compile.timeout_ms == 0 {
                    return Err(invalid(format!(
                        "language '{id}' has zero compile timeout"
                    )));
                }
            }
        }

        let judge = &self.judge;
        if !is_positive(judge.min_time_limit) || judge.min_time_limit > judge.max_time_limit {
            return Err(invalid(format!(
                "time limit bounds [{}, {}] are not a valid range",
                judge.min_time_limit, judge.max_time_limit
            )));
        }
        if judge.min_memory_limit == 0 || judge.min_memory_limit > judge.max_memory_limit {
            return Err(invalid(format!(
                "memory limit bounds [{}, {}] are not a valid range",
                judge.min_memory_limit, judge.max_memory_limit
            )));
        }
        if judge.capture_limit_bytes < judge.max_case_bytes {
            return Err(invalid(
                "capture_limit_bytes must be at least max_case_bytes".to_owned(),
            ));
        }

        if self.pool.workers == Some(0) {
            return Err(invalid("pool.workers must be at least 1".to_owned()));
        }
        if self.pool.queue_timeout_secs == 0 {
            return Err(invalid("pool.queue_timeout_secs must be positive".to_owned()));
        }

        Ok(())
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
