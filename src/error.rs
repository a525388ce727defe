//! # Pipeline Error Types
//!
//! Structured error handling for the pipeline core using thiserror. Every
//! failure is fail-fast: nothing in this crate retries, so each variant also
//! carries the process exit code used when the run is aborted.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error produced by application code (step handlers, queued tasks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Process exit codes, one per failure class.
pub mod exit_codes {
    pub const STEP_FAILURE: i32 = 1;
    pub const CONFIGURATION: i32 = 2;
    pub const CHECKPOINT_SAFETY: i32 = 3;
    pub const EXTERNAL_PROCESS: i32 = 4;
    pub const DATABASE: i32 = 5;
    pub const TASK_FAILURE: i32 = 6;
    /// The step list ended before the requested stop step.
    pub const STOP_STEP_NOT_REACHED: i32 = 7;
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A queued task failed on a pool worker. `suppressed` counts failures on
    /// other workers that were logged but not carried in this error.
    #[error("Task failed on worker {worker} ({suppressed} other worker failure(s) logged): {source}")]
    TaskFailure {
        worker: usize,
        suppressed: usize,
        #[source]
        source: BoxError,
    },

    #[error("Step #{step} ({name}) failed: {source}")]
    StepFailure {
        step: usize,
        name: String,
        exit_code: i32,
        #[source]
        source: BoxError,
    },

    #[error("Step #{step} is not runnable: {message}")]
    StepDefinition { step: usize, message: String },

    #[error("Command exited with {actual}, expected {expected}: {command}\n{output_tail}")]
    ExternalProcess {
        command: String,
        expected: i32,
        actual: String,
        output_tail: String,
    },

    #[error("Unable to start command: {command}: {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to delete {path}: not under workspace root {root}")]
    CheckpointSafety { path: PathBuf, root: PathBuf },

    #[error("Database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("I/O error during {operation} on {path}: {source}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to create context for worker {worker}: {source}")]
    WorkerContext {
        worker: usize,
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    pub fn task_failure(worker: usize, suppressed: usize, source: impl Into<BoxError>) -> Self {
        Self::TaskFailure {
            worker,
            suppressed,
            source: source.into(),
        }
    }

    /// Wrap a failed step handler. When the handler failed with a
    /// `PipelineError`, the step keeps that error's exit code.
    pub fn step_failure(step: usize, name: impl Into<String>, error: anyhow::Error) -> Self {
        let exit_code = error
            .downcast_ref::<PipelineError>()
            .map(PipelineError::exit_code)
            .unwrap_or(exit_codes::STEP_FAILURE);

        Self::StepFailure {
            step,
            name: name.into(),
            exit_code,
            source: error.into(),
        }
    }

    pub fn step_definition(step: usize, message: impl Into<String>) -> Self {
        Self::StepDefinition {
            step,
            message: message.into(),
        }
    }

    pub fn external_process(
        command: impl Into<String>,
        expected: i32,
        actual: Option<i32>,
        output_tail: impl Into<String>,
    ) -> Self {
        Self::ExternalProcess {
            command: command.into(),
            expected,
            actual: actual.map_or_else(|| "signal".to_string(), |c| c.to_string()),
            output_tail: output_tail.into(),
        }
    }

    pub fn checkpoint_safety(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self::CheckpointSafety {
            path: path.into(),
            root: root.into(),
        }
    }

    pub fn database(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Exit code used when this error aborts the pipeline run.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TaskFailure { .. } | Self::WorkerContext { .. } => exit_codes::TASK_FAILURE,
            Self::StepFailure { exit_code, .. } => *exit_code,
            Self::StepDefinition { .. } | Self::Configuration { .. } => exit_codes::CONFIGURATION,
            Self::ExternalProcess { .. } | Self::ProcessSpawn { .. } => exit_codes::EXTERNAL_PROCESS,
            Self::CheckpointSafety { .. } => exit_codes::CHECKPOINT_SAFETY,
            Self::Database { .. } => exit_codes::DATABASE,
            Self::Io { .. } => exit_codes::STEP_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
