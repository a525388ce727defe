//! # External Executables
//!
//! Geometry work is delegated to separately built programs. They are described
//! by a structured [`CommandLine`] and spawned directly, never through a shell,
//! so arguments need no quoting. The only contract observed here is streamed
//! console output and the exit code.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, info, warn};

use crate::constants::OUTPUT_TAIL_LINES;
use crate::error::{PipelineError, Result};

#[derive(Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    /// `None` accepts any exit code.
    expected_exit_code: Option<i32>,
    tolerate_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            expected_exit_code: Some(0),
            tolerate_failure: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Path argument, rendered lossily for non-UTF-8 names.
    pub fn path_arg(self, path: impl AsRef<Path>) -> Self {
        let rendered = path.as_ref().to_string_lossy().into_owned();
        self.arg(rendered)
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn expect_exit_code(mut self, code: Option<i32>) -> Self {
        self.expected_exit_code = code;
        self
    }

    /// Log a mismatched exit code as a warning instead of failing.
    pub fn tolerate_failure(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Value of an environment override; later overrides win.
    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());
        command.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Run the command, forwarding its output to the console line by line.
    /// Returns the exit code, `None` when the process ended by a signal.
    pub fn run_streaming(&self) -> Result<Option<i32>> {
        info!(command = %self, cwd = ?self.current_dir, "⚙️ PROCESS: Running command");

        let mut child = self
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::ProcessSpawn {
                command: self.to_string(),
                source: e,
            })?;

        let tail = Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL_LINES));
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let status = thread::scope(|scope| {
            if let Some(stdout) = stdout {
                let tail = &tail;
                scope.spawn(move || pump(stdout, io::stdout(), tail));
            }
            if let Some(stderr) = stderr {
                let tail = &tail;
                scope.spawn(move || pump(stderr, io::stderr(), tail));
            }
            child.wait()
        })
        .map_err(|e| PipelineError::ProcessSpawn {
            command: self.to_string(),
            source: e,
        })?;

        let tail = tail.into_inner().into_iter().collect::<Vec<_>>().join("\n");
        self.check_exit(status.code(), tail)
    }

    /// Run the command to completion and return its output instead of
    /// forwarding it.
    pub fn run_captured(&self) -> Result<CapturedOutput> {
        debug!(command = %self, "PROCESS: Running command (captured)");
        let output = self.command().output().map_err(|e| PipelineError::ProcessSpawn {
            command: self.to_string(),
            source: e,
        })?;

        let captured = CapturedOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        self.check_exit(captured.exit_code, last_lines(&captured.stderr, OUTPUT_TAIL_LINES))?;
        Ok(captured)
    }

    fn check_exit(&self, code: Option<i32>, output_tail: String) -> Result<Option<i32>> {
        let Some(expected) = self.expected_exit_code else {
            return Ok(code);
        };
        if code == Some(expected) {
            return Ok(code);
        }

        let error = PipelineError::external_process(self.to_string(), expected, code, output_tail);
        if self.tolerate_failure {
            warn!(command = %self, expected, actual = ?code, "PROCESS: Unexpected exit code tolerated");
            return Ok(code);
        }
        Err(error)
    }
}

impl fmt::Display for CommandLine {
    /// Human-readable rendering for logs; arguments with spaces are quoted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CommandLine {
    /// Environment values are left out; they may carry credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandLine")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .field("current_dir", &self.current_dir)
            .field("expected_exit_code", &self.expected_exit_code)
            .field("tolerate_failure", &self.tolerate_failure)
            .finish()
    }
}

fn pump<R: Read, W: Write>(source: R, mut sink: W, tail: &Mutex<VecDeque<String>>) {
    let mut reader = BufReader::new(source);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let _ = sink.write_all(&buffer);
                let _ = sink.flush();
                let line = String::from_utf8_lossy(&buffer).trim_end().to_string();
                let mut tail = tail.lock();
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_successful_command() {
        let code = CommandLine::new("sh").args(["-c", "echo hello"]).run_streaming().unwrap();
        assert_eq!(code, Some(0));
    }

    #[test]
    fn test_exit_code_mismatch_includes_tail() {
        let err = CommandLine::new("sh")
            .args(["-c", "echo 'bad polygon' >&2; exit 3"])
            .run_streaming()
            .unwrap_err();
        match &err {
            PipelineError::ExternalProcess {
                expected,
                actual,
                output_tail,
                ..
            } => {
                assert_eq!(*expected, 0);
                assert_eq!(actual, "3");
                assert!(output_tail.contains("bad polygon"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.exit_code(), crate::error::exit_codes::EXTERNAL_PROCESS);
    }

    #[test]
    fn test_expected_and_tolerated_codes() {
        let code = CommandLine::new("sh")
            .args(["-c", "exit 2"])
            .expect_exit_code(Some(2))
            .run_streaming()
            .unwrap();
        assert_eq!(code, Some(2));

        let code = CommandLine::new("sh")
            .args(["-c", "exit 1"])
            .tolerate_failure()
            .run_streaming()
            .unwrap();
        assert_eq!(code, Some(1));
    }

    #[test]
    fn test_arguments_are_not_shell_interpreted() {
        let captured = CommandLine::new("printf")
            .args(["%s", "$HOME; rm -rf /"])
            .run_captured()
            .unwrap();
        assert_eq!(captured.stdout, "$HOME; rm -rf /");
    }

    #[test]
    fn test_env_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let captured = CommandLine::new("sh")
            .args(["-c", "echo \"$CHUNK\"; pwd"])
            .env("CHUNK", "7")
            .current_dir(dir.path())
            .run_captured()
            .unwrap();
        let mut lines = captured.stdout.lines();
        assert_eq!(lines.next(), Some("7"));
        let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let err = CommandLine::new("definitely-not-a-real-binary-1234").run_streaming().unwrap_err();
        assert!(matches!(err, PipelineError::ProcessSpawn { .. }));
    }

    #[test]
    fn test_env_values_never_rendered() {
        let command = CommandLine::new("psql").env("PGPASSWORD", "hunter2").arg("-c").arg("SELECT 1");
        assert_eq!(command.to_string(), r#"psql -c "SELECT 1""#);
        assert!(!format!("{command:?}").contains("hunter2"));
        assert_eq!(command.get_env("PGPASSWORD"), Some("hunter2"));
    }

    #[test]
    fn test_display_quotes_arguments_with_spaces() {
        let command = CommandLine::new("ogr2ogr").args(["-f", "PostgreSQL", "PG: host=db"]);
        assert_eq!(command.to_string(), r#"ogr2ogr -f PostgreSQL "PG: host=db""#);
    }
}
