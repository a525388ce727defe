#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Geo Pipeline Core
//!
//! Concurrency and orchestration core for hours-long, multi-stage geospatial
//! batch pipelines.
//!
//! ## Overview
//!
//! A pipeline is an ordered list of steps. Each step may fan chunk-level work
//! out over a pool of OS worker threads, and skips work whose output already
//! exists on disk. Geometry algorithms are external executables; this crate
//! runs them, loads their output into PostgreSQL/PostGIS, and keeps reruns
//! cheap after a failure.
//!
//! ## Module Organization
//!
//! - [`checkpoint`] - Filesystem markers scoped to a workspace root
//! - [`execution`] - Worker pool, task queue, progress and external commands
//! - [`partition`] - Parallel chunk import into constrained child tables
//! - [`orchestration`] - Step definitions, the step runner and notifiers
//! - [`database`] - Exclusive per-worker connections and the storage seam
//! - [`config`] - Layered configuration
//! - [`error`] - Structured errors and exit codes
//! - [`logging`] - Console, detail log and JSON log output
//!
//! ## Failure Model
//!
//! Nothing retries. Any unrecovered error aborts the run with a distinguishing
//! exit code, and checkpoint markers make rerunning the same step range cheap.
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib               # Unit tests
//! cargo test                     # Unit and integration tests
//! cargo test -- --ignored        # Tests that need a live PostgreSQL
//! ```

pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod execution;
pub mod logging;
pub mod orchestration;
pub mod partition;

pub use checkpoint::{CheckpointStore, WorkspacePath, WorkspaceRoot};
pub use config::{ConfigLoader, DatabaseConfig, ExecutionConfig, PipelineConfig, RunOptions, WorkspaceConfig};
pub use database::{ConnectionFactory, DatabaseConnection, PgConnectionFactory, SpatialStore};
pub use error::{PipelineError, Result};
pub use execution::{CommandLine, PoolSummary, TaskQueue, WorkerPool, WorkerPoolConfig};
pub use logging::{init_from_config, init_structured_logging};
pub use orchestration::{Notifier, RunOutcome, Step, StepPipelineRunner};
pub use partition::{BulkCopier, Ogr2OgrCopier, Partition, PartitionedBulkLoader};
