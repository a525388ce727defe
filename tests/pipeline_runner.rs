//! Step pipeline runner: range selection, fail-fast, connections and docs mode.

mod common;

use common::{FakeConnectionFactory, FakeDatabase, FakeStore};
use geo_pipeline::error::exit_codes;
use geo_pipeline::orchestration::{Notifier, Step, StepPipelineRunner};
use geo_pipeline::PipelineError;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::process::Command;
use std::rc::Rc;
use std::sync::Arc;

fn runner() -> (StepPipelineRunner<FakeConnectionFactory>, Arc<FakeConnectionFactory>) {
    let factory = Arc::new(FakeConnectionFactory::new(FakeDatabase::shared()));
    (StepPipelineRunner::new("TZA test", Arc::clone(&factory)), factory)
}

/// Five steps that record their number when invoked; `fail_at` raises.
fn recording_steps(log: &Rc<RefCell<Vec<usize>>>, fail_at: Option<usize>) -> Vec<Step<FakeStore>> {
    (1..=5)
        .map(|n| {
            let log = Rc::clone(log);
            Step::no_args(format!("step_{n}"), format!("Step number {n}."), move || {
                log.borrow_mut().push(n);
                if fail_at == Some(n) {
                    anyhow::bail!("step {n} exploded");
                }
                Ok(())
            })
        })
        .collect()
}

#[test]
fn range_selects_only_steps_three_and_four() {
    let (runner, _) = runner();
    let log = Rc::new(RefCell::new(Vec::new()));

    let outcome = runner.run(recording_steps(&log, None), 3, 4).unwrap();

    assert_eq!(*log.borrow(), vec![3, 4]);
    assert_eq!(outcome.last_step, 5);
    assert_eq!(outcome.executed, 2);
    assert!(!outcome.ran_to_end());
    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn failure_at_step_three_stops_the_run() {
    let (runner, _) = runner();
    let log = Rc::new(RefCell::new(Vec::new()));

    let err = runner.run(recording_steps(&log, Some(3)), 1, 5).unwrap_err();

    assert_eq!(*log.borrow(), vec![1, 2, 3]);
    match &err {
        PipelineError::StepFailure { step, name, .. } => {
            assert_eq!(*step, 3);
            assert_eq!(name, "step_3");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_ne!(err.exit_code(), 0);
    assert!(err.to_string().contains("step 3 exploded"));
}

#[test]
fn list_ending_within_range_reports_stop_step_not_reached() {
    let (runner, _) = runner();
    let log = Rc::new(RefCell::new(Vec::new()));

    let outcome = runner.run(recording_steps(&log, None), 4, 9).unwrap();

    assert_eq!(*log.borrow(), vec![4, 5]);
    assert!(outcome.ran_to_end());
    assert_eq!(outcome.exit_code(), exit_codes::STOP_STEP_NOT_REACHED);
}

#[test]
fn undocumented_step_is_rejected_before_anything_runs() {
    let (runner, _) = runner();
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut steps = recording_steps(&log, None);
    steps.push(Step::no_args("step_undocumented", "   ", || Ok(())));

    let err = runner.run(steps, 1, 6).unwrap_err();

    assert!(matches!(err, PipelineError::StepDefinition { step: 6, .. }));
    assert_eq!(err.exit_code(), exit_codes::CONFIGURATION);
    assert!(log.borrow().is_empty());
}

#[test]
fn step_number_handler_receives_its_number() {
    let (runner, _) = runner();
    let seen = Rc::new(RefCell::new(None));
    let seen_in_step = Rc::clone(&seen);
    let steps = vec![
        Step::no_args("step_first", "First.", || Ok(())),
        Step::with_step_number("step_debug", "Debug.", move |n| {
            *seen_in_step.borrow_mut() = Some(n);
            Ok(())
        }),
    ];

    runner.run(steps, 1, 2).unwrap();
    assert_eq!(*seen.borrow(), Some(2));
}

#[test]
fn connection_is_closed_even_when_the_handler_fails() {
    let (runner, factory) = runner();
    let steps = vec![
        Step::with_connection("step_ok", "Uses the database.", |_conn: &mut FakeStore| Ok(())),
        Step::with_connection("step_bad", "Fails with the database.", |_conn: &mut FakeStore| {
            anyhow::bail!("bad sql")
        }),
    ];

    let err = runner.run(steps, 1, 2).unwrap_err();

    assert!(matches!(err, PipelineError::StepFailure { step: 2, .. }));
    assert_eq!(factory.opened(), 2);
    assert_eq!(factory.closed(), 2);
}

#[test]
fn connection_failure_keeps_the_inner_exit_code() {
    let runner = StepPipelineRunner::new("TZA test", Arc::new(FakeConnectionFactory::failing()));
    let steps = vec![Step::with_connection("step_db", "Needs the database.", |_conn: &mut FakeStore| Ok(()))];

    let err = runner.run(steps, 1, 1).unwrap_err();
    assert_eq!(err.exit_code(), exit_codes::CONFIGURATION);
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, text: &str) -> anyhow::Result<()> {
        self.messages.lock().push(text.to_string());
        Ok(())
    }
}

struct BrokenNotifier;

impl Notifier for BrokenNotifier {
    fn notify(&self, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!("channel unreachable")
    }
}

#[test]
fn notifier_sees_start_completion_and_failure() {
    let notifier = Arc::new(RecordingNotifier::default());
    let (runner, _) = runner();
    let runner = runner.with_notifier(notifier.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    runner.run(recording_steps(&log, Some(2)), 1, 2).unwrap_err();

    let messages = notifier.messages.lock();
    assert_eq!(messages.len(), 4);
    assert!(messages[0].contains("1 - step_1: Step number 1."));
    assert!(messages[1].contains("Completed Step #1"));
    assert!(messages[3].starts_with("Exception! TZA test"));
}

#[test]
fn failing_notifier_does_not_abort_the_run() {
    let (runner, _) = runner();
    let runner = runner.with_notifier(Arc::new(BrokenNotifier));
    let log = Rc::new(RefCell::new(Vec::new()));

    runner.run(recording_steps(&log, None), 1, 5).unwrap();
    assert_eq!(log.borrow().len(), 5);
}

#[test]
fn docs_mode_writes_markdown_without_running_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("working/doc.md");
    std::fs::create_dir_all(docs.parent().unwrap()).unwrap();
    std::fs::write(&docs, "stale content\n").unwrap();

    let (runner, factory) = runner();
    let runner = runner.with_docs(&docs);
    let invoked = Rc::new(RefCell::new(false));
    let invoked_in_step = Rc::clone(&invoked);
    let steps = vec![
        Step::no_args("step_split_chunks", "Split into chunks.\n\nOne file per grid cell.", move || {
            *invoked_in_step.borrow_mut() = true;
            Ok(())
        }),
        Step::with_connection("step_import_chunks", "Import chunks.", |_conn: &mut FakeStore| Ok(())),
    ];

    let outcome = runner.run(steps, 1, 999).unwrap();

    assert!(!*invoked.borrow());
    assert_eq!(factory.opened(), 0);
    assert_eq!(outcome.executed, 2);
    assert_eq!(
        std::fs::read_to_string(&docs).unwrap(),
        "1. **SplitChunks**\n\n     Split into chunks.\n     \n     One file per grid cell.\n\
         1. **ImportChunks**\n\n     Import chunks.\n"
    );
}

const EXIT_SCENARIO: &str = "GEO_PIPELINE_EXIT_SCENARIO";

/// Runs inside the re-executed test binary and never returns.
fn exit_with_scenario(scenario: &str) -> ! {
    let (runner, _) = runner();
    let log = Rc::new(RefCell::new(Vec::new()));
    match scenario {
        "fail_at_3" => runner.run_or_exit(recording_steps(&log, Some(3)), 1, 5),
        "ends_in_range" => runner.run_or_exit(recording_steps(&log, None), 4, 9),
        "steps_remain" => runner.run_or_exit(recording_steps(&log, None), 1, 2),
        other => panic!("unknown exit scenario {other}"),
    }
}

fn exit_code_of(scenario: &str) -> Option<i32> {
    Command::new(std::env::current_exe().unwrap())
        .args(["run_or_exit_sets_the_process_status", "--exact", "--test-threads=1"])
        .env(EXIT_SCENARIO, scenario)
        .output()
        .unwrap()
        .status
        .code()
}

#[test]
fn run_or_exit_sets_the_process_status() {
    if let Ok(scenario) = std::env::var(EXIT_SCENARIO) {
        exit_with_scenario(&scenario);
    }

    assert_eq!(exit_code_of("fail_at_3"), Some(exit_codes::STEP_FAILURE));
    assert_eq!(exit_code_of("ends_in_range"), Some(exit_codes::STOP_STEP_NOT_REACHED));
    assert_eq!(exit_code_of("steps_remain"), Some(0));
}
