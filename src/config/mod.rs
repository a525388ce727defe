//! # Pipeline Configuration
//!
//! Layered configuration for a pipeline run: built-in defaults, an optional TOML
//! file, then environment variables. The sections map onto the pieces of the
//! core they tune:
//!
//! - **database**: connection settings for every exclusive worker connection
//! - **workspace**: root under which all checkpoint markers live, log and doc paths
//! - **execution**: pool sizing, progress throttling, import thresholds, log level
//! - **run**: step range, clean flag and documentation mode
//!
//! ```rust,no_run
//! use geo_pipeline::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().with_file("pipeline.toml").load()?;
//! println!("{}", config.database.ogr_connection_string());
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{self, DOCS_STOP_STEP};
use crate::error::{PipelineError, Result};

pub use loader::ConfigLoader;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Label used in notifications and log lines, e.g. module and country code.
    pub label: String,
    pub database: DatabaseConfig,
    pub workspace: WorkspaceConfig,
    pub execution: ExecutionConfig,
    pub run: RunOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub connect_timeout_seconds: u64,
    pub statement_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5433,
            username: "postgres".to_string(),
            password: String::new(),
            database: "pipeline".to_string(),
            connect_timeout_seconds: 120,
            statement_timeout_seconds: 3600,
        }
    }
}

impl DatabaseConfig {
    /// Connection string understood by the external bulk-copy tool. The
    /// password is left out; pass it as `PGPASSWORD` so it stays out of logged
    /// command lines.
    pub fn ogr_connection_string(&self) -> String {
        format!(
            "PG: host={} dbname={} port={} user={}",
            self.host, self.database, self.port, self.username
        )
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let statement_timeout_ms = self.statement_timeout_seconds.saturating_mul(1000).to_string();
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
            .options([("statement_timeout", statement_timeout_ms.as_str())])
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Every checkpoint marker must live under this directory.
    pub root: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub docs_path: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/work"),
            log_dir: None,
            docs_path: None,
        }
    }
}

impl WorkspaceConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.root.join("logs"))
    }

    pub fn docs_path(&self) -> PathBuf {
        self.docs_path.clone().unwrap_or_else(|| self.root.join("doc.md"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_workers: usize,
    pub import_workers: usize,
    pub progress_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub empty_chunk_max_bytes: u64,
    /// Overrides the environment's default log filter.
    pub log_level: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            import_workers: constants::DEFAULT_IMPORT_WORKERS,
            progress_interval_ms: constants::PROGRESS_INTERVAL.as_millis() as u64,
            poll_interval_ms: constants::POOL_POLL_INTERVAL.as_millis() as u64,
            empty_chunk_max_bytes: constants::EMPTY_CHUNK_MAX_BYTES,
            log_level: None,
        }
    }
}

impl ExecutionConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which steps to run and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub start_step: usize,
    /// Defaults to `start_step`, i.e. run a single step.
    pub stop_step: Option<usize>,
    /// Remove each selected step's previous output before running it.
    pub clean: bool,
    /// Write step documentation instead of executing handlers.
    pub generate_docs: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_step: 1,
            stop_step: None,
            clean: false,
            generate_docs: false,
        }
    }
}

impl RunOptions {
    /// Inclusive step range; documentation mode always covers every step.
    pub fn range(&self) -> (usize, usize) {
        if self.generate_docs {
            return (1, DOCS_STOP_STEP);
        }
        (self.start_step, self.stop_step.unwrap_or(self.start_step))
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.database.host.trim().is_empty() {
            return Err(PipelineError::configuration("database.host must not be empty"));
        }
        if self.database.database.trim().is_empty() {
            return Err(PipelineError::configuration("database.database must not be empty"));
        }
        if !self.workspace.root.is_absolute() {
            return Err(PipelineError::configuration(format!(
                "workspace.root must be absolute, got {}",
                self.workspace.root.display()
            )));
        }
        if self.execution.max_workers == 0 || self.execution.import_workers == 0 {
            return Err(PipelineError::configuration(
                "execution.max_workers and execution.import_workers must be greater than 0",
            ));
        }
        if self.execution.poll_interval_ms == 0 {
            return Err(PipelineError::configuration(
                "execution.poll_interval_ms must be greater than 0",
            ));
        }
        let (start, stop) = self.run.range();
        if start == 0 || start > stop {
            return Err(PipelineError::configuration(format!(
                "invalid step range {start}..={stop}"
            )));
        }
        Ok(())
    }
}
