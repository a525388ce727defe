//! # System Constants
//!
//! Operational defaults shared by the pool, the loader and the step runner.

use std::time::Duration;

/// Minimum gap between two progress lines emitted by the same worker.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// How often the pool owner checks on its workers.
pub const POOL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Workers used for partition imports unless configured otherwise.
pub const DEFAULT_IMPORT_WORKERS: usize = 4;

/// Chunk files at or below this size hold only the spatial index header.
pub const EMPTY_CHUNK_MAX_BYTES: u64 = 628;

/// Lines of process output kept for failure diagnostics.
pub const OUTPUT_TAIL_LINES: usize = 40;

/// Step range used when generating documentation.
pub const DOCS_STOP_STEP: usize = 999;

pub mod columns {
    pub const CHUNK_KEY: &str = "chunk_number";
    pub const GEOMETRY: &str = "shape";
    pub const LEVEL: &str = "level";
}

pub mod env {
    pub const ENVIRONMENT: &str = "PIPELINE_ENV";
    pub const LOG_FILTER: &str = "PIPELINE_LOG";
    pub const CONFIG_PREFIX: &str = "PIPELINE";
}
