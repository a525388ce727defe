//! Configuration Loader
//!
//! Merges defaults, an optional TOML file and environment variables with the
//! `config` crate. Environment keys use `PIPELINE__SECTION__KEY`; the legacy
//! `POSTGRESQL_*` variables still override the database section.

use config::{Config, Environment, File};
use std::path::PathBuf;
use tracing::debug;

use super::PipelineConfig;
use crate::constants::env;
use crate::error::{PipelineError, Result};

const LEGACY_DATABASE_VARS: [(&str, &str); 5] = [
    ("POSTGRESQL_HOST", "database.host"),
    ("POSTGRESQL_PORT", "database.port"),
    ("POSTGRESQL_USERNAME", "database.username"),
    ("POSTGRESQL_PASSWORD", "database.password"),
    ("POSTGRESQL_DATABASE", "database.database"),
];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    skip_environment: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a TOML file layer; the file must exist.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Ignore environment variables. Useful for tests.
    pub fn without_environment(mut self) -> Self {
        self.skip_environment = true;
        self
    }

    pub fn load(&self) -> Result<PipelineConfig> {
        let defaults = Config::try_from(&PipelineConfig::default()).map_err(config_error)?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(file) = &self.file {
            debug!("Loading configuration file: {}", file.display());
            builder = builder.add_source(File::from(file.clone()).required(true));
        }

        if !self.skip_environment {
            builder = builder.add_source(
                Environment::with_prefix(env::CONFIG_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
            for (var, key) in LEGACY_DATABASE_VARS {
                builder = builder
                    .set_override_option(key, std::env::var(var).ok())
                    .map_err(config_error)?;
            }
        }

        let config: PipelineConfig = builder
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(config_error)?;

        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string(&sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        Ok(config)
    }
}

fn config_error(error: config::ConfigError) -> PipelineError {
    PipelineError::configuration(error.to_string())
}

/// JSON view of the configuration with secrets masked.
pub fn sanitize_config_for_logging(config: &PipelineConfig) -> serde_json::Value {
    let mut config_json = serde_json::json!(config);
    let sensitive_patterns = ["password", "secret", "token", "credential"];
    sanitize_json_recursive(&mut config_json, &sensitive_patterns);
    config_json
}

fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let is_sensitive = sensitive_patterns
                    .iter()
                    .any(|pattern| key_lower.contains(pattern));

                if is_sensitive {
                    let masked = match &*val {
                        serde_json::Value::String(s) if s.is_empty() => "[EMPTY]",
                        _ => "[MASKED]",
                    };
                    *val = serde_json::Value::String(masked.to_string());
                } else {
                    sanitize_json_recursive(val, sensitive_patterns);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                sanitize_json_recursive(item, sensitive_patterns);
            }
        }
        _ => {}
    }
}
