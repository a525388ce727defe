//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to the console and to
//! log files in the workspace, so hours-long runs can be diagnosed afterwards.

use chrono::Utc;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::PipelineConfig;
use crate::constants::env;
use crate::error::{PipelineError, Result};

static LOGGER_GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging with console, detail file and JSON file output.
///
/// Safe to call more than once; only the first call installs the subscriber.
pub fn init_structured_logging(log_dir: &Path, level: Option<&str>) -> Result<()> {
    if LOGGER_GUARDS.get().is_some() {
        return Ok(());
    }

    fs::create_dir_all(log_dir)
        .map_err(|e| PipelineError::io("create log directory", log_dir, e))?;

    let environment = get_environment();
    let filter = resolve_filter(level, &environment);

    let pid = process::id();
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();

    let detail_appender =
        tracing_appender::rolling::never(log_dir, format!("pipeline.{pid}.{timestamp}.log"));
    let (detail_writer, detail_guard) = tracing_appender::non_blocking(detail_appender);

    let json_appender =
        tracing_appender::rolling::never(log_dir, format!("pipeline.{pid}.{timestamp}.json"));
    let (json_writer, json_guard) = tracing_appender::non_blocking(json_appender);

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(filter.clone())),
        )
        .with(
            fmt::layer()
                .with_writer(detail_writer)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new(filter.clone())),
        )
        .with(
            fmt::layer()
                .with_writer(json_writer)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(filter.clone())),
        );

    if subscriber.try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
    }

    // Dropping the guards would stop the file writers.
    let _ = LOGGER_GUARDS.set(vec![detail_guard, json_guard]);

    tracing::info!(
        pid = pid,
        environment = %environment,
        filter = %filter,
        log_dir = %log_dir.display(),
        "🔧 LOGGING: Initialized with file output"
    );

    Ok(())
}

/// Initialize logging into the workspace log directory at the configured level.
pub fn init_from_config(config: &PipelineConfig) -> Result<()> {
    init_structured_logging(&config.workspace.log_dir(), config.execution.log_level.as_deref())
}

fn get_environment() -> String {
    std::env::var(env::ENVIRONMENT).unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Explicit level first, then the env filter variables, then the environment default.
fn resolve_filter(level: Option<&str>, environment: &str) -> String {
    if let Some(level) = level.filter(|l| !l.trim().is_empty()) {
        return level.trim().to_lowercase();
    }
    std::env::var(env::LOG_FILTER)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| get_log_level(environment))
}

/// Render a duration as `0h:00m:00s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (h, rem) = (total / 3600, total % 3600);
    let (m, s) = (rem / 60, rem % 60);
    format!("{h}h:{m:02}m:{s:02}s")
}

/// Like [`format_duration`] but for estimates that may not exist yet.
pub fn format_estimate(duration: Option<Duration>) -> String {
    duration.map_or_else(|| "N/A".to_string(), format_duration)
}

/// Log structured data for step lifecycle events
pub fn log_step_operation(
    operation: &str,
    step: usize,
    step_name: &str,
    status: &str,
    duration: Option<Duration>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        step = step,
        step_name = %step_name,
        status = %status,
        duration = %format_estimate(duration),
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log a throttled progress line from a pool worker
pub fn log_pool_progress(
    pool: &str,
    worker: usize,
    processed: u64,
    total: Option<usize>,
    locally_processed: u64,
    elapsed: Duration,
    estimated_total: Option<Duration>,
) {
    let remaining = estimated_total.map(|t| t.saturating_sub(elapsed));
    tracing::info!(
        pool = %pool,
        worker = worker,
        processed = processed,
        total = total,
        locally_processed = locally_processed,
        elapsed = %format_duration(elapsed),
        estimated_total = %format_estimate(estimated_total),
        remaining = %format_estimate(remaining),
        "📊 POOL_PROGRESS"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_explicit_level_wins() {
        assert_eq!(resolve_filter(Some(" WARN "), "production"), "warn");
    }

    #[test]
    fn test_init_from_config_writes_into_workspace_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.workspace.root = dir.path().to_path_buf();
        config.execution.log_level = Some("warn".to_string());

        init_from_config(&config).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|name| name.ends_with(".log")));
        assert!(names.iter().any(|name| name.ends_with(".json")));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0h:00m:00s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h:02m:05s");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "25h:00m:00s");
        assert_eq!(format_estimate(None), "N/A");
    }
}
