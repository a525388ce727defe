//! # Step Pipeline Runner
//!
//! Runs an ordered list of steps over an inclusive `[start, stop]` range.
//!
//! Steps are numbered 1..N in list order. Steps outside the range are skipped
//! without side effects, but numbering still advances so a step keeps its
//! number across runs. The runner is fail-fast: the first failing handler
//! aborts the run and nothing later in the list is invoked. Steps are expected
//! to be idempotent through checkpoint markers, so rerunning the same range
//! after fixing the cause is cheap.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::notifier::{NoopNotifier, Notifier};
use super::step::{Step, StepHandler};
use crate::config::PipelineConfig;
use crate::database::ConnectionFactory;
use crate::error::{exit_codes, PipelineError, Result};
use crate::logging::{format_duration, log_error, log_step_operation};

const BANNER: &str = "------------------------------------------------------------";

/// Where a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Number of the last step in the list (attempted or skipped).
    pub last_step: usize,
    pub stop_step: usize,
    /// Steps whose handlers ran (or were documented) in this run.
    pub executed: usize,
}

impl RunOutcome {
    /// True when the list ended at or before the requested stop step, i.e. no
    /// step remains beyond the selected range.
    pub fn ran_to_end(&self) -> bool {
        self.last_step <= self.stop_step
    }

    /// Process exit code for a successful run.
    pub fn exit_code(&self) -> i32 {
        if self.ran_to_end() {
            exit_codes::STOP_STEP_NOT_REACHED
        } else {
            0
        }
    }
}

pub struct StepPipelineRunner<F: ConnectionFactory> {
    label: String,
    connections: Arc<F>,
    notifier: Arc<dyn Notifier>,
    docs_path: Option<PathBuf>,
}

impl<F: ConnectionFactory> StepPipelineRunner<F> {
    pub fn new(label: impl Into<String>, connections: Arc<F>) -> Self {
        Self {
            label: label.into(),
            connections,
            notifier: Arc::new(NoopNotifier),
            docs_path: None,
        }
    }

    /// Runner for the configured label, with documentation mode enabled when
    /// `run.generate_docs` is set.
    pub fn from_config(config: &PipelineConfig, connections: Arc<F>) -> Self {
        let runner = Self::new(config.label.clone(), connections);
        if config.run.generate_docs {
            runner.with_docs(config.workspace.docs_path())
        } else {
            runner
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Document steps into `path` instead of executing them.
    pub fn with_docs(mut self, path: impl Into<PathBuf>) -> Self {
        self.docs_path = Some(path.into());
        self
    }

    pub fn docs_path(&self) -> Option<&Path> {
        self.docs_path.as_deref()
    }

    pub fn run(&self, steps: Vec<Step<F::Connection>>, start_step: usize, stop_step: usize) -> Result<RunOutcome> {
        // Every step must be documented before anything runs.
        for (index, step) in steps.iter().enumerate() {
            if step.description().is_none() {
                return Err(PipelineError::step_definition(
                    index + 1,
                    format!("step '{}' needs a doc text", step.name()),
                ));
            }
        }

        info!(
            label = %self.label,
            start_step,
            stop_step,
            steps = steps.len(),
            docs = self.docs_path.is_some(),
            "🚀 PIPELINE: Starting run"
        );

        let mut outcome = RunOutcome {
            last_step: 0,
            stop_step,
            executed: 0,
        };

        for step in steps {
            outcome.last_step += 1;
            let number = outcome.last_step;
            if number < start_step || number > stop_step {
                continue;
            }

            match &self.docs_path {
                Some(path) => self.document_step(path, number, &step)?,
                None => self.run_step(number, step)?,
            }
            outcome.executed += 1;
        }

        if outcome.ran_to_end() {
            info!(label = %self.label, last_step = outcome.last_step, "🏁 PIPELINE: Finished running to stop step {}", stop_step);
        }
        Ok(outcome)
    }

    /// Run and terminate the process: the step's exit code on failure, 7 when
    /// the list ended within the requested range, 0 otherwise.
    pub fn run_or_exit(&self, steps: Vec<Step<F::Connection>>, start_step: usize, stop_step: usize) -> ! {
        let code = match self.run(steps, start_step, stop_step) {
            Ok(outcome) => outcome.exit_code(),
            Err(e) => {
                error!(label = %self.label, exit_code = e.exit_code(), "💥 PIPELINE: Aborting run: {}", e);
                e.exit_code()
            }
        };
        std::process::exit(code)
    }

    fn run_step(&self, number: usize, step: Step<F::Connection>) -> Result<()> {
        let name = step.name().to_string();
        let description = step.description().unwrap_or_default();

        let start_msg = format!("\n{BANNER}\n\t\t\t{number} - {name}: {description}\n{BANNER}");
        info!("{}", start_msg);
        log_step_operation("start", number, &name, "running", None, None);
        self.notify(&format!("{}\n{}", self.label, start_msg));

        let started = Instant::now();
        let result = match step.into_handler() {
            StepHandler::NoArgs(handler) => handler(),
            StepHandler::WithStepNumber(handler) => handler(number),
            StepHandler::WithConnection(handler) => self.with_connection(handler),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                let completed = format!(
                    "Completed Step #{number} - {description} in {}",
                    format_duration(elapsed)
                );
                info!("✅ {}", completed);
                log_step_operation("complete", number, &name, "success", Some(elapsed), None);
                self.notify(&format!("{}\n{}", self.label, completed));
                Ok(())
            }
            Err(e) => {
                log_error("pipeline", &name, &format!("{e:#}"), Some(&format!("step #{number}")));
                error!(step = number, step_name = %name, error = ?e, "❌ PIPELINE: Step failed");
                log_step_operation("complete", number, &name, "failed", Some(elapsed), None);
                self.notify(&format!("Exception! {} step #{number} {name}: {e:#}", self.label));
                Err(PipelineError::step_failure(number, name, e))
            }
        }
    }

    fn with_connection(&self, handler: Box<dyn FnOnce(&mut F::Connection) -> anyhow::Result<()>>) -> anyhow::Result<()> {
        let mut connection = self.connections.connect()?;
        let result = handler(&mut connection);
        if let Err(e) = self.connections.close(connection) {
            info!("Connection not closed: {}", e);
        }
        result
    }

    fn document_step(&self, path: &Path, number: usize, step: &Step<F::Connection>) -> Result<()> {
        if number == 1 && path.exists() {
            fs::remove_file(path).map_err(|e| PipelineError::io("truncate docs", path, e))?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io("create docs directory", parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::io("open docs", path, e))?;
        file.write_all(step.doc_markdown().as_bytes())
            .map_err(|e| PipelineError::io("write docs", path, e))?;

        log_step_operation("document", number, step.name(), "documented", None, None);
        Ok(())
    }

    fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text) {
            warn!(error = %e, "PIPELINE: Notification failed");
        }
    }
}
